use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Unknown,
    Online,
    Offline,
    Error,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Unknown => "unknown",
            NodeState::Online => "online",
            NodeState::Offline => "offline",
            NodeState::Error => "error",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest poll outcome for one node. Replaced wholesale on every sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStatus {
    pub state: NodeState,
    /// Epoch seconds of the poll.
    pub last_check: Option<f64>,
    pub response_time_ms: Option<f64>,
    pub last_error: Option<String>,
    /// Body of the node's health response, when it sent one.
    pub response: Option<Value>,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self {
            state: NodeState::Unknown,
            last_check: None,
            response_time_ms: None,
            last_error: None,
            response: None,
        }
    }
}

/// One row of the append-only status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Assigned by the store on append.
    #[serde(default)]
    pub id: u64,
    pub timestamp: f64,
    pub datetime: String,
    pub pi_id: String,
    pub status: String,
    /// JSON-encoded chassis list.
    pub chassis_list: Option<String>,
    pub error_msg: Option<String>,
    pub response_time_ms: Option<f64>,
    /// JSON-encoded node health response.
    pub pi_response: Option<String>,
}

impl HistoryRecord {
    pub fn new(at: OffsetDateTime, pi_id: &str, status: NodeState) -> Self {
        Self {
            id: 0,
            timestamp: epoch_seconds(at),
            datetime: at.format(&Rfc3339).unwrap_or_default(),
            pi_id: pi_id.to_string(),
            status: status.as_str().to_string(),
            chassis_list: None,
            error_msg: None,
            response_time_ms: None,
            pi_response: None,
        }
    }
}

pub fn epoch_seconds(at: OffsetDateTime) -> f64 {
    at.unix_timestamp() as f64 + f64::from(at.nanosecond()) / 1_000_000_000.0
}
