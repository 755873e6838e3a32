//! Error taxonomy shared by every proxkit crate.

/// Errors returned synchronously by client operations.
///
/// Validation errors carry no side effects: the call that returned them
/// changed nothing. `ConnectionFailed` is never returned from a call site;
/// it exists so failure reasons render the same way in callbacks and logs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KitError {
    #[error("operation requires a connected client")]
    NotConnected,
    #[error("discovery info is {len} bytes, maximum is {max}")]
    InfoTooLong { len: usize, max: usize },
    #[error("malformed destination node id: {0:?}")]
    MalformedDestination(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(FailureReason),
}

/// Why the backend could not be (or stay) connected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("proximity service is not installed")]
    ServiceMissing,
    #[error("proximity service must be updated")]
    ServiceUpdateRequired,
    #[error("proximity service is disabled")]
    ServiceDisabled,
    #[error("application key was rejected")]
    InvalidAppKey,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl FailureReason {
    /// Stable numeric status code, as reported by the service status check.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ServiceMissing => 1,
            Self::ServiceUpdateRequired => 2,
            Self::ServiceDisabled => 3,
            Self::NetworkError(_) => 7,
            Self::Internal(_) => 8,
            Self::InvalidAppKey => 10,
        }
    }
}
