//! proxkit wire format — the discovery beacon.
//!
//! A beacon is a fixed packed header followed by `info_len` bytes of
//! discovery info. Every field and every size here is part of the
//! protocol; bump `PROTOCOL_VERSION` before changing any of it.
//!
//! The header is #[repr(C, packed)] and uses zerocopy derives for
//! allocation-free parsing. There is no unsafe code in this module.

use bytes::Bytes;
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::node::NodeId;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Largest discovery info payload a beacon can carry.
/// Sized to fit one legacy BLE advertisement.
pub const MAX_DISCOVERY_INFO_LEN: usize = 31;

/// Link-local all-nodes multicast group.
pub const MULTICAST_ADDR: &str = "ff02::1";

/// UDP port on which beacons are sent and received.
pub const BEACON_PORT: u16 = 9310;

/// UDP port on which message datagrams are sent and received.
pub const MESSAGE_PORT: u16 = 9311;

/// How often the local node re-broadcasts its beacon.
pub const BEACON_INTERVAL_MS: u64 = 1_000;

/// A peer with no sighting for this long is declared lost.
pub const PEER_LIVENESS_WINDOW_MS: u64 = 10_000;

pub const PROTOCOL_VERSION: u8 = 1;

pub const BEACON_MAGIC: [u8; 4] = *b"PXKB";

/// Beacon flag: the sender publishes discovery info (possibly empty).
pub const FLAG_HAS_INFO: u8 = 0b0000_0001;
/// Beacon flag: the sighting was produced by the location-assisted path.
pub const FLAG_GEO: u8 = 0b0000_0010;

/// Identifies the application a node runs, derived from its app key.
/// Nodes only see beacons and messages carrying their own app hash.
pub type AppHash = [u8; 32];

pub fn app_hash(app_key: &str) -> AppHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"proxkit.app:");
    hasher.update(app_key.as_bytes());
    *hasher.finalize().as_bytes()
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("datagram too short: {0} bytes")]
    TooShort(usize),
    #[error("bad magic")]
    BadMagic,
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("discovery info of {0} bytes exceeds the maximum")]
    InfoTooLong(usize),
    #[error("declared {declared} info bytes, only {available} present")]
    Truncated { declared: usize, available: usize },
    #[error("payload is not valid hex")]
    BadPayloadEncoding,
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

// ── Beacon Header ─────────────────────────────────────────────────────────────

/// Fixed part of a discovery beacon.
///
/// Wire size: 60 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct BeaconHeader {
    /// Always `BEACON_MAGIC`.
    pub magic: [u8; 4],

    /// BLAKE3-derived hash of the sender's app key.
    pub app_hash: [u8; 32],

    /// Sender's node id.
    pub node_id: [u8; 16],

    /// Currently `PROTOCOL_VERSION`. Unknown versions are dropped.
    pub version: u8,

    /// `FLAG_HAS_INFO` | `FLAG_GEO`. Other bits reserved, must be zero.
    pub flags: u8,

    /// Number of discovery info bytes following the header.
    pub info_len: u8,

    /// Reserved, must be zero.
    pub reserved: u8,

    /// Sender-local counter, incremented per beacon. Diagnostics only.
    pub sequence: u32,
}

assert_eq_size!(BeaconHeader, [u8; 60]);

/// Decoded beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    pub app_hash: AppHash,
    pub node_id: NodeId,
    pub sequence: u32,
    pub geo: bool,
    /// `None` when the sender publishes no discovery info at all.
    pub info: Option<Bytes>,
}

impl Beacon {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let info_len = self.info.as_ref().map(|i| i.len()).unwrap_or(0);
        if info_len > MAX_DISCOVERY_INFO_LEN {
            return Err(WireError::InfoTooLong(info_len));
        }

        let mut flags = 0;
        if self.info.is_some() {
            flags |= FLAG_HAS_INFO;
        }
        if self.geo {
            flags |= FLAG_GEO;
        }

        let header = BeaconHeader {
            magic: BEACON_MAGIC,
            app_hash: self.app_hash,
            node_id: *self.node_id.as_bytes(),
            version: PROTOCOL_VERSION,
            flags,
            info_len: info_len as u8,
            reserved: 0,
            sequence: self.sequence,
        };

        let mut out = Vec::with_capacity(std::mem::size_of::<BeaconHeader>() + info_len);
        out.extend_from_slice(header.as_bytes());
        if let Some(info) = &self.info {
            out.extend_from_slice(info);
        }
        Ok(out)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let header = BeaconHeader::read_from_prefix(buf).ok_or(WireError::TooShort(buf.len()))?;

        if header.magic != BEACON_MAGIC {
            return Err(WireError::BadMagic);
        }
        if header.version != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion(header.version));
        }

        let declared = header.info_len as usize;
        if declared > MAX_DISCOVERY_INFO_LEN {
            return Err(WireError::InfoTooLong(declared));
        }
        let body = &buf[std::mem::size_of::<BeaconHeader>()..];
        if body.len() < declared {
            return Err(WireError::Truncated {
                declared,
                available: body.len(),
            });
        }

        let info = if header.flags & FLAG_HAS_INFO != 0 {
            Some(Bytes::copy_from_slice(&body[..declared]))
        } else {
            None
        };
        let sequence = header.sequence; // copy out of the packed struct

        Ok(Self {
            app_hash: header.app_hash,
            node_id: NodeId::from_bytes(header.node_id),
            sequence,
            geo: header.flags & FLAG_GEO != 0,
            info,
        })
    }
}
