//! Relay node - serves the relay boards attached to one host
//!
//! Exposes single-relay, whole-board and named-switch access over HTTP for
//! the relay coordinator, which polls `/api/status` for liveness and sends
//! full (board, relay) instructions to `/api/relay/control`.

use anyhow::{Context, Result};
use relay_node::config::{config_path, load_settings};
use relay_node::driver::{RelayBank, SimulatedDriver};
use relay_node::http::{build_router, NodeApp};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relay_node=info")),
        )
        .init();

    let path = config_path();
    let settings = load_settings(&path)
        .await
        .with_context(|| format!("loading {}", path.display()))?;
    let switches = settings.assignment().context("building switch table")?;
    let num_boards = settings.board_count(&switches)?;

    warn!("no hardware driver configured, using simulated relay boards");
    let driver = Arc::new(SimulatedDriver::new(num_boards));
    let bank = RelayBank::new(driver, num_boards, settings.layout.board_capacity);

    info!(
        node_id = %settings.node_id,
        chassis = ?settings.chassis,
        boards = num_boards,
        switches = switches.len(),
        "relay node starting"
    );

    let app = build_router(NodeApp {
        node_id: settings.node_id.clone(),
        chassis: settings.chassis.clone(),
        bank,
        switches: Arc::new(switches),
    });

    let listener = TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("binding {}", settings.listen))?;
    info!("listening on http://{}", settings.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("ctrl-c handler failed: {e}");
            }
            info!("shutdown requested");
        })
        .await
        .context("http server failed")?;
    Ok(())
}
