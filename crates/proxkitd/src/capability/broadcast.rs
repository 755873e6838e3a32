//! Discovery beacon broadcast.
//!
//! Periodically sends the local node's beacon to the link-local multicast
//! group so nearby peers can see it. The discovery info is read fresh for
//! every beacon: peers pick up a change on the next interval.

use std::net::{Ipv6Addr, SocketAddrV6};

use anyhow::{Context, Result};
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::sync::watch;
use tokio::time;

use proxkit_core::config::NetworkConfig;
use proxkit_core::wire::Beacon;
use proxkit_core::{FailureReason, ServiceStatus};

use crate::backend::SessionContext;

/// Broadcast the local beacon on the configured interval.
///
/// Runs forever — cancel by dropping the future.
pub async fn beacon_loop(ctx: &SessionContext, info: watch::Receiver<Option<Bytes>>) -> Result<()> {
    let socket = make_multicast_socket(ctx.interface_index)
        .context("failed to create multicast broadcast socket")?;

    let multicast = multicast_group(&ctx.config.network)?;
    let dest = SocketAddrV6::new(multicast, ctx.config.network.beacon_port, 0, ctx.interface_index);
    let interval_ms = ctx.config.discovery.beacon_interval_ms;
    let mut interval = time::interval(ctx.config.discovery.beacon_interval());
    let mut sequence: u32 = 0;

    tracing::info!(
        interface_index = ctx.interface_index,
        node = %ctx.node_id,
        interval_ms,
        "beacon broadcast starting"
    );

    loop {
        interval.tick().await;

        let beacon = Beacon {
            app_hash: ctx.app_hash,
            node_id: ctx.node_id,
            sequence,
            geo: ctx.geo,
            info: info.borrow().clone(),
        };
        sequence = sequence.wrapping_add(1);

        let bytes = match beacon.encode() {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "beacon not encodable, skipped");
                continue;
            }
        };
        match socket.send_to(&bytes, &dest.into()) {
            Ok(n) => tracing::trace!(bytes = n, sequence = beacon.sequence, "beacon sent"),
            Err(e) => tracing::warn!(error = %e, "beacon send failed"),
        }
    }
}

/// Create a UDP socket suitable for sending IPv6 multicast.
pub fn make_multicast_socket(interface_index: u32) -> Result<Socket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))
        .context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_multicast_if_v6(interface_index).context("IPV6_MULTICAST_IF")?;
    // TTL 1 — link-local only, do not route beyond this link
    socket.set_multicast_hops_v6(1).context("IPV6_MULTICAST_HOPS")?;

    Ok(socket)
}

/// The configured multicast group, which must be an IPv6 multicast address.
pub fn multicast_group(network: &NetworkConfig) -> Result<Ipv6Addr> {
    let group: Ipv6Addr = network
        .multicast_addr
        .parse()
        .with_context(|| format!("invalid multicast address '{}'", network.multicast_addr))?;
    if !group.is_multicast() {
        anyhow::bail!("'{}' is not a multicast address", group);
    }
    Ok(group)
}

/// Get the OS interface index for a named network interface.
/// Returns an error if the interface does not exist.
pub fn if_index(name: &str) -> Result<u32> {
    let name_cstr = std::ffi::CString::new(name).context("interface name contains null byte")?;
    let index = unsafe { libc::if_nametoindex(name_cstr.as_ptr()) };
    if index == 0 {
        anyhow::bail!("interface '{}' not found", name);
    }
    Ok(index)
}

/// Whether `name` still resolves to the interface we were started on.
pub fn interface_status(name: &str, expected_index: u32) -> ServiceStatus {
    match if_index(name) {
        Ok(index) if index == expected_index => ServiceStatus::Available,
        Ok(index) => {
            tracing::warn!(interface = name, index, expected_index, "interface index changed");
            ServiceStatus::Unavailable(FailureReason::ServiceDisabled)
        }
        Err(e) => {
            tracing::debug!(error = %e, "interface unavailable");
            ServiceStatus::Unavailable(FailureReason::ServiceDisabled)
        }
    }
}
