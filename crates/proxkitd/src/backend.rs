//! UDP multicast backend.
//!
//! Each activation spawns one session task on the tokio runtime. The task
//! opens the sockets, acknowledges the session with a fresh random node id,
//! and then runs the beacon, listener, expiry and message loops until the
//! session is deactivated or one of the loops fails.

use std::sync::Mutex;

use anyhow::Result;
use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};

use proxkit_core::config::KitConfig;
use proxkit_core::wire::{app_hash, AppHash};
use proxkit_core::{FailureReason, NodeId, OutboundMessage, ServiceState, ServiceStatus};
use proxkit_services::{ActivationRequest, Backend, BackendSink};

use crate::capability::{self, AddressBook, SessionClock};
use crate::messaging;

/// Everything the loops of one session share.
pub struct SessionContext {
    pub node_id: NodeId,
    pub app_hash: AppHash,
    pub interface_index: u32,
    /// Advertise and accept location-assisted sightings.
    pub geo: bool,
    pub config: KitConfig,
    pub sink: BackendSink,
    pub addresses: AddressBook,
    /// Time base for sightings, ticks and address expiry.
    pub clock: SessionClock,
}

struct ActiveSession {
    id: u64,
    shutdown: broadcast::Sender<()>,
    info: watch::Sender<Option<Bytes>>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
}

pub struct UdpBackend {
    config: KitConfig,
    interface: String,
    interface_index: u32,
    geo: bool,
    runtime: Handle,
    active: Mutex<Option<ActiveSession>>,
}

impl UdpBackend {
    /// Must be called from within a tokio runtime; sessions run on it.
    pub fn new(config: KitConfig, interface: String, geo: bool) -> Result<Self> {
        let interface_index = capability::broadcast::if_index(&interface)?;
        Ok(Self {
            config,
            interface,
            interface_index,
            geo,
            runtime: Handle::current(),
            active: Mutex::new(None),
        })
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ActiveSession {
    fn stop(self) {
        tracing::info!(session = self.id, "deactivating");
        let _ = self.shutdown.send(());
    }
}

impl Backend for UdpBackend {
    fn status(&self) -> ServiceStatus {
        capability::broadcast::interface_status(&self.interface, self.interface_index)
    }

    fn activate(&self, request: ActivationRequest, sink: BackendSink) {
        if let Some(previous) = self.lock_active().take() {
            previous.stop();
        }

        if !sink.is_live() {
            tracing::debug!(session = request.session_id, "session ended before activation");
            return;
        }
        if request.app_key.is_empty() {
            tracing::warn!(session = request.session_id, "empty app key rejected");
            sink.failed(FailureReason::InvalidAppKey);
            return;
        }

        let ctx = SessionContext {
            node_id: NodeId::random(),
            app_hash: app_hash(&request.app_key),
            interface_index: self.interface_index,
            geo: self.geo,
            config: self.config.clone(),
            sink,
            addresses: AddressBook::new(),
            clock: SessionClock::start(),
        };
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let (info, info_rx) = watch::channel(None);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        tracing::info!(
            session = request.session_id,
            node = %ctx.node_id,
            app = %hex::encode(&ctx.app_hash[..4]),
            "activating"
        );

        *self.lock_active() = Some(ActiveSession {
            id: request.session_id,
            shutdown,
            info,
            outbound,
        });
        self.runtime
            .spawn(run_session(ctx, info_rx, outbound_rx, shutdown_rx));
    }

    fn deactivate(&self, session_id: u64) {
        let stopped = {
            let mut active = self.lock_active();
            match active.as_ref().map(|a| a.id) {
                Some(current) if current == session_id => active.take(),
                Some(current) => {
                    tracing::debug!(session = session_id, active = current, "stale deactivation ignored");
                    None
                }
                None => None,
            }
        };
        if let Some(session) = stopped {
            session.stop();
        }
    }

    fn publish_discovery_info(&self, info: Option<Bytes>) {
        if let Some(active) = self.lock_active().as_ref() {
            active.info.send_replace(info);
        }
    }

    fn send_message(&self, message: OutboundMessage) {
        if let Some(active) = self.lock_active().as_ref() {
            if active.outbound.send(message).is_err() {
                tracing::debug!("session task gone, message dropped");
            }
        }
    }
}

async fn run_session(
    ctx: SessionContext,
    info: watch::Receiver<Option<Bytes>>,
    outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    mut shutdown: broadcast::Receiver<()>,
) {
    ctx.sink.acknowledged(ctx.node_id);
    ctx.sink.p2p_state(ServiceState::On);
    ctx.sink.messaging_state(ServiceState::On);
    if ctx.geo {
        ctx.sink.geo_state(ServiceState::On);
    }

    let result = tokio::select! {
        r = capability::broadcast::beacon_loop(&ctx, info) => r,
        r = capability::listener::listener_loop(&ctx) => r,
        r = capability::listener::expiry_loop(&ctx) => r,
        r = messaging::receive_loop(&ctx) => r,
        r = messaging::send_loop(&ctx, outbound) => r,
        _ = shutdown.recv() => {
            tracing::debug!(node = %ctx.node_id, "session task stopping");
            return;
        }
    };

    if !ctx.sink.is_live() {
        return;
    }
    match result {
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "session failed");
            ctx.sink.failed(FailureReason::NetworkError(format!("{e:#}")));
        }
        Ok(()) => {
            tracing::warn!("session loop ended");
            ctx.sink.lost();
        }
    }
}
