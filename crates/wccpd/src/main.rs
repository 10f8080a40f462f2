//! wccpd: WCCPv2 cache or router daemon.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::{Context, Result};

use wccp_core::config::{load_services, Role, ServiceLoad, WccpConfig};
use wccp_core::{CacheEndpoint, Endpoint, RouterEndpoint, SecurityPolicy};

mod daemon;
mod socket;

/// First router any service would contact, used to pick a local address.
fn first_seed(services: &ServiceLoad) -> Option<Ipv4Addr> {
    services
        .services
        .iter()
        .flat_map(|def| def.routers.iter())
        .chain(services.routers.iter())
        .next()
        .copied()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    let path = match std::env::args().nth(1) {
        Some(p) => PathBuf::from(p),
        None => {
            if let Err(e) = WccpConfig::write_default_if_missing() {
                tracing::warn!(error = %e, "failed to write default config");
            }
            WccpConfig::file_path()
        }
    };
    let (config, doc) = WccpConfig::load_from(&path).context("failed to load config")?;
    let services = load_services(&doc);
    services.diagnostics.log();
    if services.services.is_empty() {
        tracing::warn!(path = %path.display(), "no service groups loaded");
    }

    let port = config.daemon.port;
    let local = if config.daemon.address.is_unspecified() {
        let seed = first_seed(&services).context("no address configured and no seed router to probe")?;
        socket::probe_local_addr(seed, port)?
    } else {
        config.daemon.address
    };

    let socket = socket::bind(config.daemon.address, port).context("failed to bind WCCP socket")?;
    tracing::info!(addr = %local, port, role = ?config.daemon.role, "wccpd starting");

    let endpoint: Box<dyn Endpoint> = match config.daemon.role {
        Role::Cache => {
            let mut ep = CacheEndpoint::new(local, SecurityPolicy::default());
            let n = ep.load_services(&services);
            tracing::info!(groups = n, "cache service groups defined");
            Box::new(ep)
        }
        Role::Router => {
            let mut ep = RouterEndpoint::new(local, SecurityPolicy::default());
            let n = ep.load_services(&services);
            tracing::info!(groups = n, "router service groups defined");
            Box::new(ep)
        }
    };

    // ── Shutdown ──────────────────────────────────────────────────────────────

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let shutdown_rx = shutdown_tx.subscribe();
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    daemon::Daemon::new(socket, endpoint, port).run(shutdown_rx).await
}
