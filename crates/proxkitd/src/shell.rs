//! Demo shell — command line handling and the listeners the daemon installs.
//!
//! Each node publishes a 3-byte RGB color as its discovery info and greets
//! every peer that shows up through location-assisted discovery. A session
//! that fails or is lost is retried with exponential backoff.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::runtime::Handle;

use proxkit_core::message::msg_types;
use proxkit_core::{ConnectionState, FailureReason, LifecycleEvent, NodeId, ServiceStatus};
use proxkit_services::{DiscoveryEvent, GeoEvent, KitClient, MessageEvent};

pub const DEFAULT_APP_KEY: &str = "proxkit-demo";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    /// Interface name. `None` falls back to the configuration file.
    pub interface: Option<String>,
    pub app_key: String,
    pub geo: bool,
    /// Published as discovery info. `None` picks a random color.
    pub color: Option<[u8; 3]>,
}

impl Args {
    /// `proxkitd [INTERFACE] [--geo] [--app-key KEY] [--color RRGGBB]`
    pub fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut parsed = Self {
            interface: None,
            app_key: DEFAULT_APP_KEY.to_string(),
            geo: false,
            color: None,
        };
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--geo" => parsed.geo = true,
                "--app-key" => {
                    parsed.app_key = args.next().context("--app-key needs a value")?;
                }
                "--color" => {
                    let value = args.next().context("--color needs a value")?;
                    parsed.color = Some(parse_color(&value)?);
                }
                flag if flag.starts_with("--") => anyhow::bail!("unknown option '{}'", flag),
                _ if parsed.interface.is_none() => parsed.interface = Some(arg),
                _ => anyhow::bail!("unexpected argument '{}'", arg),
            }
        }
        Ok(parsed)
    }
}

/// Accepts `RRGGBB` or `#RRGGBB`.
pub fn parse_color(value: &str) -> Result<[u8; 3]> {
    let digits = value.strip_prefix('#').unwrap_or(value);
    let bytes = hex::decode(digits).with_context(|| format!("invalid color '{}'", value))?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("color '{}' must be 3 bytes", value))
}

/// Discovery info as a `#RRGGBB` color when it is one, hex otherwise.
pub fn render_info(info: Option<&Bytes>) -> String {
    match info {
        None => "-".to_string(),
        Some(b) if b.len() == 3 => format!("#{:02X}{:02X}{:02X}", b[0], b[1], b[2]),
        Some(b) => hex::encode(b),
    }
}

pub fn greeting(from: &NodeId) -> String {
    format!("Hello from {}", from.short())
}

/// Reconnect delays: doubling from `initial` up to `max`. A successful
/// connection resets it.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: AtomicU32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            attempt: AtomicU32::new(0),
        }
    }

    pub fn next_delay(&self) -> Duration {
        let attempt = self.attempt.fetch_add(1, Ordering::Relaxed).min(16);
        self.initial.saturating_mul(1 << attempt).min(self.max)
    }

    pub fn reset(&self) {
        self.attempt.store(0, Ordering::Relaxed);
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

/// Connect once the host reports the service available, polling with
/// `backoff` until it does.
pub async fn connect_when_available(
    client: &KitClient,
    app_key: &str,
    backoff: &Backoff,
) -> ConnectionState {
    loop {
        match client.service_status() {
            ServiceStatus::Available => return client.connect(app_key),
            ServiceStatus::Unavailable(reason) => {
                let delay = backoff.next_delay();
                tracing::warn!(
                    %reason,
                    code = reason.status_code(),
                    retry_ms = delay.as_millis() as u64,
                    "proximity service unavailable"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Install the demo listeners. Session-scoped listeners are registered on
/// the first `Connected` of each session; a resume does not register them
/// twice. Must be called from within a tokio runtime.
pub fn install(client: &KitClient, color: [u8; 3], app_key: String, backoff: Arc<Backoff>) {
    let session_ready = AtomicBool::new(false);
    let handle = client.clone();
    let runtime = Handle::current();

    client.add_lifecycle_listener(move |event: &LifecycleEvent| match event {
        LifecycleEvent::Connected => {
            tracing::info!("connected");
            backoff.reset();
            if !session_ready.swap(true, Ordering::AcqRel) {
                if let Err(e) = start_session(&handle, color) {
                    tracing::error!(error = %e, "failed to start demo session");
                }
            }
        }
        LifecycleEvent::ConnectionSuspended => tracing::warn!("connection suspended"),
        LifecycleEvent::ConnectionFailed(FailureReason::InvalidAppKey) => {
            session_ready.store(false, Ordering::Release);
            tracing::error!(app_key = %app_key, "application key rejected, not retrying");
        }
        LifecycleEvent::ConnectionFailed(reason) => {
            session_ready.store(false, Ordering::Release);
            tracing::error!(%reason, code = reason.status_code(), "connection failed");
            reconnect(&runtime, &handle, &app_key, &backoff);
        }
        LifecycleEvent::Disconnected => {
            session_ready.store(false, Ordering::Release);
            tracing::warn!("disconnected by backend");
            reconnect(&runtime, &handle, &app_key, &backoff);
        }
    });
}

fn reconnect(runtime: &Handle, client: &KitClient, app_key: &str, backoff: &Arc<Backoff>) {
    let delay = backoff.next_delay();
    tracing::info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
    let (client, app_key, backoff) = (client.clone(), app_key.to_string(), backoff.clone());
    runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        let state = connect_when_available(&client, &app_key, &backoff).await;
        tracing::info!(%state, "reconnect requested");
    });
}

fn start_session(client: &KitClient, color: [u8; 3]) -> Result<()> {
    let me = client.current_node_id()?;
    tracing::info!(node = %me, color = %render_info(Some(&Bytes::copy_from_slice(&color))), "node ready");

    let discovery = client.discovery()?;
    let messaging = client.messaging()?;

    discovery.add_p2p_listener(|event: &DiscoveryEvent| match event {
        DiscoveryEvent::StateChanged(state) => tracing::info!(%state, "p2p discovery"),
        DiscoveryEvent::PeerDiscovered(peer) => tracing::info!(
            peer = %peer.node_id,
            color = %render_info(peer.discovery_info.as_ref()),
            "peer discovered"
        ),
        DiscoveryEvent::PeerUpdatedDiscoveryInfo(peer) => tracing::info!(
            peer = %peer.node_id,
            color = %render_info(peer.discovery_info.as_ref()),
            "peer changed color"
        ),
        DiscoveryEvent::PeerLost(peer) => tracing::info!(peer = %peer.node_id, "peer lost"),
    })?;

    let sender = messaging.clone();
    discovery.add_geo_listener(move |event: &GeoEvent| match event {
        GeoEvent::StateChanged(state) => tracing::info!(%state, "geo discovery"),
        GeoEvent::PeerDiscovered(peer) => {
            tracing::info!(peer = %peer, "geo peer discovered");
            if let Err(e) = sender.send_message(*peer, msg_types::SIMPLE_CHAT, greeting(&me)) {
                tracing::warn!(error = %e, peer = %peer, "greeting not sent");
            }
        }
        GeoEvent::PeerLost(peer) => tracing::info!(peer = %peer, "geo peer lost"),
    })?;

    messaging.add_listener(|event: &MessageEvent| match event {
        MessageEvent::StateChanged(state) => tracing::info!(%state, "messaging"),
        MessageEvent::MessageReceived(message) if message.msg_type == msg_types::SIMPLE_CHAT => {
            tracing::info!(
                from = %message.origin,
                text = %String::from_utf8_lossy(&message.payload),
                "chat message"
            )
        }
        MessageEvent::MessageReceived(message) => tracing::info!(
            from = %message.origin,
            msg_type = %message.msg_type,
            bytes = message.payload.len(),
            "message received"
        ),
    })?;

    discovery.set_discovery_info(Bytes::copy_from_slice(&color))?;
    Ok(())
}
