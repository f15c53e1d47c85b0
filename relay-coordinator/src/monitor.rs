//! Background liveness polling.
//!
//! Each sweep polls every node's `GET /api/status` concurrently. A node's
//! result is written to the [`StatusCache`] as one whole entry and appended
//! to the history store; a failure on one node never touches another.

use crate::forward::{ForwardError, Forwarded, Forwarder};
use crate::history::HistoryStore;
use crate::models::{epoch_seconds, HistoryRecord, NodeState, NodeStatus};
use crate::routing::{NodeRoute, RoutingTable};
use crate::state::StatusCache;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub const HEALTH_PATH: &str = "/api/status";

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Outcome of polling one node.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub node_id: String,
    pub previous: NodeState,
    pub status: NodeStatus,
}

#[derive(Clone)]
pub struct LivenessMonitor {
    routes: Arc<RoutingTable>,
    forwarder: Forwarder,
    cache: StatusCache,
    history: Arc<dyn HistoryStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    poll_timeout: Duration,
}

impl LivenessMonitor {
    pub fn new(
        routes: Arc<RoutingTable>,
        forwarder: Forwarder,
        cache: StatusCache,
        history: Arc<dyn HistoryStore>,
        interval: Duration,
    ) -> Self {
        let poll_timeout = forwarder.default_timeout();
        Self {
            routes,
            forwarder,
            cache,
            history,
            clock: Arc::new(SystemClock),
            interval,
            poll_timeout,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Polls every node once.
    pub async fn sweep(&self) -> Vec<PollOutcome> {
        let polls = self.routes.nodes().map(|node| self.poll_node(node));
        let outcomes = join_all(polls).await;

        let online = outcomes
            .iter()
            .filter(|o| o.status.state == NodeState::Online)
            .count();
        debug!(nodes = outcomes.len(), online, "status sweep complete");
        outcomes
    }

    async fn poll_node(&self, node: &NodeRoute) -> PollOutcome {
        let started = Instant::now();
        let reply = self
            .forwarder
            .forward(&node.url, HEALTH_PATH, reqwest::Method::GET, None, Some(self.poll_timeout))
            .await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let checked_at = self.clock.now();

        let mut status = NodeStatus {
            last_check: Some(epoch_seconds(checked_at)),
            ..NodeStatus::default()
        };
        match reply {
            Ok(reply) if reply.is_success() && reports_online(&reply) => {
                status.state = NodeState::Online;
                status.response_time_ms = Some(elapsed_ms);
                status.response = Some(reply.body);
            }
            Ok(reply) if reply.is_success() => {
                status.state = NodeState::Offline;
                status.last_error = Some(if reply.json {
                    let reported = reply.body.get("status").and_then(Value::as_str).unwrap_or("missing");
                    format!("Unexpected health status: {reported}")
                } else {
                    "Health response is not JSON".to_string()
                });
            }
            Ok(reply) if reply.json => {
                status.state = NodeState::Error;
                status.response_time_ms = Some(elapsed_ms);
                status.last_error = Some(format!("HTTP {}", reply.status.as_u16()));
                status.response = Some(reply.body);
            }
            Ok(reply) => {
                status.state = NodeState::Offline;
                status.last_error = Some(format!("HTTP {}", reply.status.as_u16()));
            }
            Err(e) => {
                status.state = NodeState::Offline;
                status.last_error = Some(describe(&e));
            }
        }

        let previous = self.cache.state_of(&node.node_id);
        self.cache.set(&node.node_id, status.clone());
        self.log_transition(node, previous, &status);
        self.record(node, checked_at, &status);

        PollOutcome {
            node_id: node.node_id.clone(),
            previous,
            status,
        }
    }

    fn log_transition(&self, node: &NodeRoute, previous: NodeState, status: &NodeStatus) {
        if status.state != NodeState::Online {
            warn!(
                node_id = %node.node_id,
                url = %node.url,
                status = %status.state,
                error = status.last_error.as_deref().unwrap_or(""),
                "node health check failed"
            );
        }
        if previous != status.state {
            info!(node_id = %node.node_id, from = %previous, to = %status.state, "node status changed");
        }
    }

    fn record(&self, node: &NodeRoute, at: OffsetDateTime, status: &NodeStatus) {
        let mut record = HistoryRecord::new(at, &node.node_id, status.state);
        record.error_msg = status.last_error.clone();
        record.response_time_ms = status.response_time_ms;
        record.chassis_list = serde_json::to_string(&chassis_list(node, status.response.as_ref())).ok();
        record.pi_response = status
            .response
            .as_ref()
            .and_then(|r| serde_json::to_string(r).ok());

        if let Err(e) = self.history.append(record) {
            warn!(node_id = %node.node_id, "failed to record status history: {e}");
        }
    }

    /// Sweeps immediately, then every `interval` until `shutdown` turns true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            nodes = self.routes.node_ids().len(),
            interval_secs = self.interval.as_secs_f64(),
            "liveness monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("liveness monitor stopped");
    }
}

/// A healthy node answers with a JSON object carrying `"status": "online"`.
fn reports_online(reply: &Forwarded) -> bool {
    reply.json && reply.body.get("status").and_then(Value::as_str) == Some("online")
}

fn describe(err: &ForwardError) -> String {
    match err {
        ForwardError::Timeout { timeout_secs, .. } => format!("Timeout after {timeout_secs}s"),
        ForwardError::Unreachable { .. } => "Connection refused".to_string(),
        other => other.to_string(),
    }
}

/// Chassis the node reports controlling, else the configured ones.
fn chassis_list(node: &NodeRoute, response: Option<&Value>) -> Value {
    response
        .and_then(|r| r.get("chassis_controlled"))
        .filter(|c| c.is_array())
        .cloned()
        .unwrap_or_else(|| Value::from(node.chassis.clone()))
}
