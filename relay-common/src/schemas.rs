//! JSON bodies exchanged between the coordinator and relay nodes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `POST /api/relay/control` body sent by the coordinator to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayControlRequest {
    pub switch_name: String,
    pub hat: u32,
    pub relay: u32,
    pub state: u8,
}

/// `GET /api/status` body returned by a healthy node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatusReport {
    pub status: String,
    pub node_id: String,
    #[serde(default)]
    pub chassis_controlled: Vec<u32>,
    #[serde(default)]
    pub total_switches: usize,
    #[serde(default)]
    pub num_boards: u32,
    /// RFC3339 time the report was produced.
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// State of one named switch as reported by its node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchState {
    pub switch_name: String,
    pub chassis: Option<u32>,
    pub hat: u32,
    pub relay: u32,
    pub state: u8,
    pub status: String,
}

pub fn state_label(state: u8) -> &'static str {
    if state == 1 {
        "ON"
    } else {
        "OFF"
    }
}

/// Accepts `0`/`1` (or `false`/`true`) and rejects everything else.
pub fn parse_state(value: &Value) -> Option<u8> {
    match value {
        Value::Bool(b) => Some(u8::from(*b)),
        Value::Number(n) => match n.as_u64() {
            Some(0) => Some(0),
            Some(1) => Some(1),
            _ => None,
        },
        _ => None,
    }
}
