//! Node HTTP API consumed by the coordinator: board/relay access, named
//! switch reads over the node's local switch table, and status reporting.

use crate::driver::{DriverError, RelayBank};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use relay_common::schemas::{parse_state, state_label, NodeStatusReport, SwitchState};
use relay_common::{AssignedSwitch, Assignment, Slot};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct NodeApp {
    pub node_id: String,
    pub chassis: Vec<u32>,
    pub bank: RelayBank,
    pub switches: Arc<Assignment>,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeApiError {
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("Missing state in request body")]
    MissingState,
    #[error("{0}")]
    BadRequest(String),
    #[error("Invalid switch name: {name}")]
    UnknownSwitch { name: String, valid_switches: Vec<String> },
    #[error("Chassis {chassis} is not controlled by this node")]
    UnknownChassis { chassis: u32, available_chassis: Vec<u32> },
}

impl IntoResponse for NodeApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, body) = match self {
            NodeApiError::Driver(e) if e.is_client_error() => {
                (StatusCode::BAD_REQUEST, json!({ "error": message }))
            }
            NodeApiError::Driver(DriverError::Unavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": message }))
            }
            NodeApiError::Driver(_) => {
                warn!("{message}");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message }))
            }
            NodeApiError::MissingState | NodeApiError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, json!({ "error": message }))
            }
            NodeApiError::UnknownSwitch { valid_switches, .. } => (
                StatusCode::NOT_FOUND,
                json!({ "error": message, "valid_switches": valid_switches }),
            ),
            NodeApiError::UnknownChassis { available_chassis, .. } => (
                StatusCode::NOT_FOUND,
                json!({ "error": message, "available_chassis": available_chassis }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

type NodeResult = Result<Json<Value>, NodeApiError>;

pub fn build_router(app: NodeApp) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/health", get(health))
        .route("/api/relay/all", get(all_relays))
        .route("/api/relay/reset", post(reset_relays))
        .route("/api/relay/control", post(control))
        .route("/api/relay/stack/{board}", get(board_relays))
        .route("/api/relay/{board}/{relay}", get(get_relay).post(set_relay))
        .route("/api/switch/list", get(list_switches))
        .route("/api/switch/chassis/{chassis}", get(chassis_switches))
        .route("/api/switch/{name}", get(get_switch))
        .with_state(app)
}

async fn status(State(app): State<NodeApp>) -> Json<NodeStatusReport> {
    Json(NodeStatusReport {
        status: "online".into(),
        node_id: app.node_id.clone(),
        chassis_controlled: app.chassis.clone(),
        total_switches: app.switches.len(),
        num_boards: app.bank.num_boards(),
        timestamp: Some(Utc::now().to_rfc3339()),
    })
}

async fn health(State(app): State<NodeApp>) -> Json<Value> {
    Json(json!({ "status": "ok", "boards": app.bank.health() }))
}

fn parse_index(raw: &str, what: &str) -> Result<u32, NodeApiError> {
    raw.parse()
        .map_err(|_| NodeApiError::BadRequest(format!("Invalid {what}: {raw}")))
}

fn requested_state(body: &[u8]) -> Result<u8, NodeApiError> {
    let payload: Value = serde_json::from_slice(body).map_err(|_| NodeApiError::MissingState)?;
    let state = payload.get("state").ok_or(NodeApiError::MissingState)?;
    parse_state(state).ok_or(NodeApiError::Driver(DriverError::InvalidState))
}

async fn get_relay(State(app): State<NodeApp>, Path((board, relay)): Path<(String, String)>) -> NodeResult {
    let board = parse_index(&board, "board")?;
    let relay = parse_index(&relay, "relay")?;
    let state = app.bank.get(board, relay)?;
    Ok(Json(json!({
        "hat": board,
        "relay": relay,
        "state": state,
        "status": state_label(state),
    })))
}

async fn set_relay(
    State(app): State<NodeApp>,
    Path((board, relay)): Path<(String, String)>,
    body: Bytes,
) -> NodeResult {
    let board = parse_index(&board, "board")?;
    let relay = parse_index(&relay, "relay")?;
    let state = requested_state(&body)?;
    app.bank.set(board, relay, state)?;

    let label = state_label(state);
    info!(board, relay, state = label, "relay set");
    Ok(Json(json!({
        "hat": board,
        "relay": relay,
        "state": state,
        "status": label,
        "message": format!("Board {board}, Relay {relay} turned {label}"),
    })))
}

async fn all_relays(State(app): State<NodeApp>) -> Json<Value> {
    Json(Value::Object(app.bank.all_states()))
}

async fn board_relays(State(app): State<NodeApp>, Path(board): Path<String>) -> NodeResult {
    let board = parse_index(&board, "board")?;
    let relays = app.bank.board_states(board)?;
    Ok(Json(json!({ "hat": board, "relays": relays })))
}

async fn reset_relays(State(app): State<NodeApp>) -> Json<Value> {
    let results = app.bank.reset();
    info!(boards = results.len(), "all relays reset");
    Json(json!({ "message": "Reset command sent to all boards", "results": results }))
}

#[derive(Debug, Deserialize)]
struct ControlBody {
    #[serde(default)]
    switch_name: Option<String>,
    hat: u32,
    relay: u32,
    state: Option<Value>,
}

/// Full relay instruction from the coordinator. The coordinator's slot is
/// applied as given; the local switch table is only consulted for logging.
async fn control(State(app): State<NodeApp>, body: Bytes) -> NodeResult {
    let cmd: ControlBody = serde_json::from_slice(&body)
        .map_err(|e| NodeApiError::BadRequest(format!("Invalid control request: {e}")))?;
    let state = cmd.state.as_ref().ok_or(NodeApiError::MissingState)?;
    let state = parse_state(state).ok_or(DriverError::InvalidState)?;

    if let Some(local) = cmd.switch_name.as_deref().and_then(|n| app.switches.get(n)) {
        if (local.slot.board, local.slot.relay) != (cmd.hat, cmd.relay) {
            warn!(
                switch = %local.name,
                local_hat = local.slot.board,
                local_relay = local.slot.relay,
                hat = cmd.hat,
                relay = cmd.relay,
                "coordinator slot differs from local mapping"
            );
        }
    }

    app.bank.set(cmd.hat, cmd.relay, state)?;
    let label = state_label(state);
    let name = cmd.switch_name.unwrap_or_else(|| {
        app.switches
            .switch_at(Slot::new(cmd.hat, cmd.relay))
            .map(|s| s.name.clone())
            .unwrap_or_else(|| format!("HAT{}_R{}", cmd.hat, cmd.relay))
    });
    info!(switch = %name, hat = cmd.hat, relay = cmd.relay, state = label, "relay control");

    Ok(Json(json!({
        "success": true,
        "switch_name": name,
        "hat": cmd.hat,
        "relay": cmd.relay,
        "state": state,
        "status": label,
        "message": format!("{name} turned {label}"),
    })))
}

fn switch_state(app: &NodeApp, entry: &AssignedSwitch) -> Result<SwitchState, DriverError> {
    let state = app.bank.get(entry.slot.board, entry.slot.relay)?;
    Ok(SwitchState {
        switch_name: entry.name.clone(),
        chassis: entry.chassis,
        hat: entry.slot.board,
        relay: entry.slot.relay,
        state,
        status: state_label(state).to_string(),
    })
}

/// `{name: state}` for `entries`; unreadable switches carry an `error`.
fn switch_map<'a>(app: &NodeApp, entries: impl Iterator<Item = &'a AssignedSwitch>) -> Map<String, Value> {
    entries
        .map(|entry| {
            let value = match switch_state(app, entry) {
                Ok(s) => json!({
                    "chassis": s.chassis,
                    "hat": s.hat,
                    "relay": s.relay,
                    "state": s.state,
                    "status": s.status,
                }),
                Err(e) => json!({
                    "chassis": entry.chassis,
                    "hat": entry.slot.board,
                    "relay": entry.slot.relay,
                    "error": e.to_string(),
                }),
            };
            (entry.name.clone(), value)
        })
        .collect()
}

async fn get_switch(State(app): State<NodeApp>, Path(name): Path<String>) -> Result<Json<SwitchState>, NodeApiError> {
    let entry = app.switches.get(&name).ok_or_else(|| NodeApiError::UnknownSwitch {
        name: name.clone(),
        valid_switches: app.switches.iter().map(|e| e.name.clone()).collect(),
    })?;
    Ok(Json(switch_state(&app, entry)?))
}

async fn list_switches(State(app): State<NodeApp>) -> Json<Value> {
    let switches = switch_map(&app, app.switches.iter());
    Json(json!({ "node_id": app.node_id, "total": switches.len(), "switches": switches }))
}

async fn chassis_switches(State(app): State<NodeApp>, Path(chassis): Path<String>) -> NodeResult {
    let chassis = parse_index(&chassis, "chassis")?;
    let entries = app.switches.switches_in_chassis(chassis);
    if entries.is_empty() {
        return Err(NodeApiError::UnknownChassis {
            chassis,
            available_chassis: app.switches.chassis().into_iter().collect(),
        });
    }
    let switches = switch_map(&app, entries.into_iter());
    Ok(Json(json!({ "chassis": chassis, "switches": switches })))
}
