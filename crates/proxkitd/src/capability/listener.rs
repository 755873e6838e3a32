//! Discovery beacon listener.
//!
//! Joins the multicast group and listens for beacons from nearby peers.
//! Valid beacons of our own app become sightings in the session's sink and
//! refresh the sender's entry in the address book. A separate expiry task
//! drives the liveness sweep.

use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use proxkit_core::wire::{AppHash, Beacon};
use proxkit_core::{NodeId, Timestamp};
use proxkit_services::Sighting;

use crate::backend::SessionContext;

/// What the listener does with one datagram.
#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    /// A peer of our app.
    Peer(Beacon),
    /// Our own beacon looped back.
    Own,
    /// A beacon from another app.
    ForeignApp,
}

/// Classify a datagram. Errors are malformed beacons.
pub fn classify(
    buf: &[u8],
    app_hash: &AppHash,
    local: &NodeId,
) -> Result<Received, proxkit_core::wire::WireError> {
    let beacon = Beacon::decode(buf)?;
    if beacon.node_id == *local {
        return Ok(Received::Own);
    }
    if beacon.app_hash != *app_hash {
        return Ok(Received::ForeignApp);
    }
    Ok(Received::Peer(beacon))
}

/// Listen for beacons and feed sightings into the session.
///
/// Runs forever — cancel by dropping the future.
pub async fn listener_loop(ctx: &SessionContext) -> Result<()> {
    let socket = make_listener_socket(ctx)
        .context("failed to create multicast listener socket")?;

    // Convert to tokio UdpSocket for async recv
    let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;

    let mut buf = vec![0u8; 1024];

    tracing::info!(port = ctx.config.network.beacon_port, "beacon listener starting");

    loop {
        let (len, peer_addr) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "recv_from failed");
                continue;
            }
        };

        // Extract the sender's IPv6 address
        let sender = match peer_addr {
            SocketAddr::V6(v6) => v6,
            SocketAddr::V4(_) => {
                tracing::warn!("received IPv4 datagram on IPv6 socket, ignoring");
                continue;
            }
        };

        match classify(&buf[..len], &ctx.app_hash, &ctx.node_id) {
            Ok(Received::Peer(beacon)) => {
                tracing::trace!(
                    node = %beacon.node_id,
                    addr = %peer_addr,
                    sequence = beacon.sequence,
                    "beacon received"
                );
                on_beacon(ctx, beacon, sender, ctx.clock.now());
            }
            Ok(Received::Own) => tracing::trace!("ignoring own beacon"),
            Ok(Received::ForeignApp) => tracing::trace!(addr = %peer_addr, "beacon of another app"),
            Err(e) => tracing::debug!(error = %e, addr = %peer_addr, "malformed beacon dropped"),
        }
    }
}

fn on_beacon(ctx: &SessionContext, beacon: Beacon, sender: SocketAddrV6, at: Timestamp) {
    let reply_to = SocketAddrV6::new(
        *sender.ip(),
        ctx.config.network.message_port,
        0,
        ctx.interface_index,
    );
    ctx.addresses.record(beacon.node_id, reply_to, at);

    if beacon.geo && ctx.geo {
        ctx.sink.geo_sighting(beacon.node_id, at);
    }
    ctx.sink.sighting(Sighting {
        node_id: beacon.node_id,
        info: beacon.info,
        at,
    });
}

/// Emit a liveness tick on every check interval and prune stale addresses.
///
/// Returns once the session's sink is dead, which ends a session task whose
/// client has already moved on.
pub async fn expiry_loop(ctx: &SessionContext) -> Result<()> {
    let window_ms = ctx.config.discovery.liveness_window_ms;
    let mut interval = tokio::time::interval(ctx.config.discovery.expiry_check_interval());

    loop {
        interval.tick().await;
        if !ctx.sink.is_live() {
            tracing::debug!(session = ctx.sink.session_id(), "sink closed, expiry stopping");
            return Ok(());
        }

        let now = ctx.clock.now();
        ctx.sink.tick(now);

        let removed = ctx.addresses.expire(now, window_ms);
        if removed > 0 {
            tracing::debug!(removed, "expired peer addresses");
        }
    }
}

/// Create a UDP socket joined to the beacon multicast group.
fn make_listener_socket(ctx: &SessionContext) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_only_v6(true).context("IPV6_V6ONLY")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    // Lets several nodes share one host, e.g. for local testing.
    socket.set_multicast_loop_v6(true).context("IPV6_MULTICAST_LOOP")?;

    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, ctx.config.network.beacon_port, 0, 0);
    socket.bind(&bind_addr.into()).context("bind()")?;

    let multicast = super::broadcast::multicast_group(&ctx.config.network)?;
    socket
        .join_multicast_v6(&multicast, ctx.interface_index)
        .context("IPV6_JOIN_GROUP")?;

    Ok(socket.into())
}
