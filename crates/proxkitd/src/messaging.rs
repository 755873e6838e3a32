//! Message socket — best-effort delivery of typed messages.
//!
//! Outbound messages are sealed into a JSON envelope and sent unicast to
//! the address of the destination's last beacon. A destination we have no
//! address for gets the envelope on the multicast group instead; every
//! node of the app receives it and all but the addressee drop it.

use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use proxkit_core::config::MessagingConfig;
use proxkit_core::message::MessageEnvelope;
use proxkit_core::wire::{AppHash, WireError};
use proxkit_core::{now_millis, Message, NodeId, OutboundMessage, Timestamp};

use crate::backend::SessionContext;
use crate::capability::broadcast;

/// Largest message datagram we try to receive.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Seal a message for the wire, enforcing the configured limits.
pub fn encode_outbound(
    app_hash: &AppHash,
    limits: &MessagingConfig,
    message: &OutboundMessage,
) -> Result<Vec<u8>> {
    if message.payload.len() > limits.max_payload_bytes {
        anyhow::bail!(
            "payload is {} bytes, limit is {}",
            message.payload.len(),
            limits.max_payload_bytes
        );
    }
    if message.msg_type.len() > limits.max_type_len {
        anyhow::bail!("message type tag longer than {} bytes", limits.max_type_len);
    }
    let bytes = MessageEnvelope::seal(app_hash, message)
        .to_bytes()
        .context("failed to serialize envelope")?;
    Ok(bytes)
}

/// Parse a received datagram. `Ok(None)` means well-formed but not for us.
pub fn decode_inbound(
    buf: &[u8],
    app_hash: &AppHash,
    local: &NodeId,
    now: Timestamp,
) -> Result<Option<Message>, WireError> {
    let envelope = MessageEnvelope::from_bytes(buf)?;
    if !envelope.is_for_app(app_hash) || envelope.destination != *local || envelope.origin == *local {
        return Ok(None);
    }
    let mut message = envelope.open()?;
    message.received_at = now;
    Ok(Some(message))
}

/// Drain the session's outbound queue onto the network.
///
/// Returns when the queue is closed, i.e. the session was deactivated.
pub async fn send_loop(
    ctx: &SessionContext,
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
) -> Result<()> {
    let socket = make_send_socket(ctx.interface_index)
        .context("failed to create message send socket")?;
    let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;

    let fallback = SocketAddrV6::new(
        broadcast::multicast_group(&ctx.config.network)?,
        ctx.config.network.message_port,
        0,
        ctx.interface_index,
    );

    while let Some(message) = outbound.recv().await {
        let bytes = match encode_outbound(&ctx.app_hash, &ctx.config.messaging, &message) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, destination = %message.destination, "message dropped");
                continue;
            }
        };

        let dest = match ctx.addresses.lookup(&message.destination) {
            Some(addr) => addr,
            None => {
                tracing::debug!(destination = %message.destination, "no known address, using multicast");
                fallback
            }
        };

        match socket.send_to(&bytes, SocketAddr::V6(dest)).await {
            Ok(n) => tracing::trace!(bytes = n, addr = %dest, "message datagram sent"),
            Err(e) => tracing::warn!(error = %e, addr = %dest, "message send failed"),
        }
    }
    Ok(())
}

/// Receive message datagrams and hand ours to the session.
///
/// Runs forever — cancel by dropping the future.
pub async fn receive_loop(ctx: &SessionContext) -> Result<()> {
    let socket = make_receive_socket(ctx).context("failed to create message receive socket")?;
    let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;

    let mut buf = vec![0u8; MAX_DATAGRAM];
    tracing::info!(port = ctx.config.network.message_port, "message listener starting");

    loop {
        let (len, peer_addr) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "recv_from failed");
                continue;
            }
        };

        match decode_inbound(&buf[..len], &ctx.app_hash, &ctx.node_id, now_millis()) {
            Ok(Some(message)) => ctx.sink.message_received(message),
            Ok(None) => tracing::trace!(addr = %peer_addr, "message for someone else"),
            Err(e) => tracing::debug!(error = %e, addr = %peer_addr, "malformed message dropped"),
        }
    }
}

fn make_send_socket(interface_index: u32) -> Result<std::net::UdpSocket> {
    let socket = broadcast::make_multicast_socket(interface_index)?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0);
    socket.bind(&bind_addr.into()).context("bind()")?;
    Ok(socket.into())
}

fn make_receive_socket(ctx: &SessionContext) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_only_v6(true).context("IPV6_V6ONLY")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, ctx.config.network.message_port, 0, 0);
    socket.bind(&bind_addr.into()).context("bind()")?;

    // Fallback deliveries arrive on the group.
    let multicast = broadcast::multicast_group(&ctx.config.network)?;
    socket
        .join_multicast_v6(&multicast, ctx.interface_index)
        .context("IPV6_JOIN_GROUP")?;

    Ok(socket.into())
}
