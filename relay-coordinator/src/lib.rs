//! Relay coordinator: resolves logical switch names to node/board/relay
//! slots, forwards commands to relay nodes over HTTP, and tracks node
//! liveness in the background.

pub mod config;
pub mod forward;
pub mod history;
pub mod http;
pub mod models;
pub mod monitor;
pub mod routing;
pub mod state;

use crate::config::{ConfigError, CoordinatorConfig};
use crate::forward::Forwarder;
use crate::history::HistoryStore;
use crate::http::AppState;
use crate::monitor::LivenessMonitor;
use crate::routing::RoutingTable;
use crate::state::StatusCache;
use axum::Router;
use std::sync::Arc;

/// Everything the binary runs: the HTTP state and the monitor that feeds it.
pub struct Coordinator {
    pub state: AppState,
    pub monitor: LivenessMonitor,
}

impl Coordinator {
    pub fn new(cfg: &CoordinatorConfig, history: Arc<dyn HistoryStore>) -> Result<Self, ConfigError> {
        let routes = Arc::new(RoutingTable::from_config(cfg)?);
        let forwarder = Forwarder::new(cfg.request_timeout());
        let cache = StatusCache::new(routes.node_ids());

        let monitor = LivenessMonitor::new(
            routes.clone(),
            forwarder.clone(),
            cache.clone(),
            history.clone(),
            cfg.status_check_interval(),
        );
        let state = AppState {
            routes,
            forwarder,
            cache,
            history,
        };
        Ok(Self { state, monitor })
    }

    pub fn router(&self) -> Router {
        http::build_router(self.state.clone())
    }
}
