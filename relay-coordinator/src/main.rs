use anyhow::Context;
use relay_coordinator::config::{config_path, load_config};
use relay_coordinator::history::{FileHistoryStore, HistoryStore, MemoryHistoryStore};
use relay_coordinator::Coordinator;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("relay_coordinator=info")),
        )
        .init();

    let path = config_path();
    let cfg = load_config(&path)
        .await
        .with_context(|| format!("loading {}", path.display()))?;

    let history: Arc<dyn HistoryStore> = match &cfg.history_path {
        Some(p) => Arc::new(
            FileHistoryStore::open(p)
                .with_context(|| format!("opening status history {}", p.display()))?,
        ),
        None => {
            warn!("no history_path configured, status history is kept in memory only");
            Arc::new(MemoryHistoryStore::new())
        }
    };

    let coordinator = Coordinator::new(&cfg, history).context("invalid node topology")?;
    let routes = coordinator.state.routes.clone();
    info!(
        nodes = routes.node_ids().len(),
        switches = routes.switch_count(),
        chassis = ?routes.chassis_numbers(),
        "routing table built"
    );

    let (stop, stopped) = watch::channel(false);
    let monitor = tokio::spawn(coordinator.monitor.clone().run(stopped));

    let app = coordinator.router();
    let listener = TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("binding {}", cfg.listen))?;
    info!("listening on http://{}", cfg.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("ctrl-c handler failed: {e}");
            }
            info!("shutdown requested");
        })
        .await
        .context("http server failed")?;

    let _ = stop.send(true);
    let _ = monitor.await;
    Ok(())
}
