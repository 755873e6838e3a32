//! proxkitd — proximity discovery demo daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use proxkit_core::config::KitConfig;
use proxkit_services::{EngineConfig, KitClient};

mod backend;
mod capability;
mod messaging;
mod shell;

use backend::UdpBackend;
use shell::Backoff;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = KitConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = KitConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        KitConfig::default()
    });

    let args = shell::Args::parse(std::env::args().skip(1))?;
    let interface = args
        .interface
        .clone()
        .or_else(|| Some(config.network.interface.clone()).filter(|i| !i.is_empty()))
        .context("no interface given on the command line or in the config")?;
    tracing::info!(interface, geo = args.geo, "proxkitd starting");

    let backend = Arc::new(UdpBackend::new(config.clone(), interface, args.geo)?);
    let client = KitClient::with_config(backend, EngineConfig::from(&config));

    let color = args.color.unwrap_or_else(rand::random);
    let backoff = Arc::new(Backoff::default());
    shell::install(&client, color, args.app_key.clone(), backoff.clone());

    {
        let client = client.clone();
        let app_key = args.app_key.clone();
        tokio::spawn(async move {
            let state = shell::connect_when_available(&client, &app_key, &backoff).await;
            tracing::info!(%state, app_key = %app_key, "connect requested");
        });
    }

    // ── Status printer ───────────────────────────────────────────────────────

    let status_printer = {
        let client = client.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                let peers = client.snapshot();
                tracing::info!(
                    state = %client.state(),
                    peers = peers.len(),
                    geo = client.snapshot_geo().len(),
                    "peer table snapshot"
                );
                for peer in peers {
                    tracing::info!(
                        node = %peer.node_id,
                        color = %shell::render_info(peer.discovery_info.as_ref()),
                        "  peer"
                    );
                }
            }
        })
    };

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r.context("failed to listen for ctrl-c")?;
            tracing::info!("shutting down");
        }
        r = status_printer => tracing::error!("status printer exited: {:?}", r),
    }

    client.disconnect();
    Ok(())
}
