/*!
Coordinator REST API

Name-based switch control, direct node/board/relay addressing, chassis
lookups, and read-only views over the liveness cache and status history.

Relay commands are forwarded once. Node replies pass through with their own
status code; transport failures map to 504/503/500. Status endpoints read the
cache and never trigger a poll.
*/

use crate::forward::{ForwardError, Forwarded, Forwarder};
use crate::history::{HistoryError, HistoryStore, DEFAULT_QUERY_LIMIT};
use crate::routing::{ResolutionError, RoutingTable};
use crate::state::StatusCache;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::future::join_all;
use relay_common::schemas::{parse_state, RelayControlRequest};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RoutingTable>,
    pub forwarder: Forwarder,
    pub cache: StatusCache,
    pub history: Arc<dyn HistoryStore>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid switch name: {name}")]
    UnknownSwitch { name: String, valid_switches: Vec<String> },
    #[error("Invalid Pi ID: {id}")]
    UnknownNode { id: String, valid_pis: Vec<String> },
    #[error("No Pi configured to control chassis {chassis}")]
    UnknownChassis { chassis: u32, available_chassis: Vec<u32> },
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Forward(#[from] ForwardError),
    #[error("status history unavailable: {0}")]
    History(#[from] HistoryError),
}

impl ApiError {
    fn resolution(err: ResolutionError, routes: &RoutingTable) -> Self {
        match err {
            ResolutionError::UnknownSwitch(name) => ApiError::UnknownSwitch {
                name,
                valid_switches: routes.all_switch_names(),
            },
            ResolutionError::UnknownNode(id) => ApiError::UnknownNode {
                id,
                valid_pis: routes.node_ids(),
            },
            ResolutionError::UnknownChassis(chassis) => ApiError::UnknownChassis {
                chassis,
                available_chassis: routes.chassis_numbers(),
            },
        }
    }

    fn missing_state() -> Self {
        ApiError::BadRequest("Missing state in request body".into())
    }

    fn invalid_state() -> Self {
        ApiError::BadRequest("State must be 0 or 1".into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, body) = match self {
            ApiError::UnknownSwitch { valid_switches, .. } => (
                StatusCode::BAD_REQUEST,
                json!({ "error": message, "valid_switches": valid_switches }),
            ),
            ApiError::UnknownNode { valid_pis, .. } => (
                StatusCode::BAD_REQUEST,
                json!({ "error": message, "valid_pis": valid_pis }),
            ),
            ApiError::UnknownChassis { available_chassis, .. } => (
                StatusCode::NOT_FOUND,
                json!({ "error": message, "available_chassis": available_chassis }),
            ),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            ApiError::Forward(e) => {
                warn!(url = e.url().unwrap_or(""), "forward failed: {e}");
                (e.status_code(), e.body())
            }
            ApiError::History(_) => {
                warn!("{message}");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message }))
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

fn relay(reply: Forwarded) -> Response {
    (reply.status, Json(reply.body)).into_response()
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/status", get(status_overview))
        .route("/api/status/history", get(status_history))
        .route("/api/status/stats", get(status_stats))
        .route("/api/pis", get(list_nodes))
        .route("/api/switch/list", get(list_switches))
        .route("/api/switch/chassis/{chassis}", get(chassis_switches))
        .route("/api/switch/{name}", get(get_switch).post(set_switch))
        .route(
            "/api/relay/{pi_id}/{hat}/{relay}",
            get(get_relay).post(set_relay),
        )
        .with_state(app_state)
}

async fn status_overview(State(app): State<AppState>) -> Json<Value> {
    let snapshot = app.cache.snapshot();
    let mut nodes = Map::new();
    let mut all_online = true;

    for node in app.routes.nodes() {
        let status = snapshot.get(&node.node_id).cloned().unwrap_or_default();
        all_online &= status.state == crate::models::NodeState::Online;

        let total_switches = status
            .response
            .as_ref()
            .and_then(|r| r.get("total_switches"))
            .cloned()
            .unwrap_or_else(|| json!(node.assignment.len()));

        nodes.insert(
            node.node_id.clone(),
            json!({
                "ip": node.ip_address,
                "ip_address": node.ip_address,
                "port": node.port,
                "chassis": node.chassis,
                "description": node.description,
                "pi_url": node.url,
                "status": status.state,
                "last_check": status.last_check,
                "response_time_ms": status.response_time_ms,
                "error": status.last_error,
                "response": status.response,
                "total_switches": total_switches,
            }),
        );
    }

    Json(json!({
        "main_server_status": "online",
        "all_pis_online": all_online,
        "raspberry_pis": nodes,
        "total_pis": nodes.len(),
        "total_switches": app.routes.switch_count(),
    }))
}

async fn list_nodes(State(app): State<AppState>) -> Json<Value> {
    let pis: Vec<Value> = app
        .routes
        .nodes()
        .map(|node| {
            let status = app.cache.get(&node.node_id).unwrap_or_default();
            json!({
                "pi_id": node.node_id,
                "ip_address": node.ip_address,
                "port": node.port,
                "chassis": node.chassis,
                "description": node.description,
                "num_relay_hats": node.board_count,
                "status": status.state,
                "last_check": status.last_check,
                "pi_url": node.url,
            })
        })
        .collect();

    Json(json!({ "total": pis.len(), "raspberry_pis": pis }))
}

async fn get_switch(State(app): State<AppState>, Path(name): Path<String>) -> ApiResult {
    let route = app
        .routes
        .resolve_switch(&name)
        .map_err(|e| ApiError::resolution(e, &app.routes))?;

    let reply = app
        .forwarder
        .get(&route.node_url, &format!("/api/switch/{}", route.name))
        .await?;
    Ok(relay(reply))
}

async fn set_switch(State(app): State<AppState>, Path(name): Path<String>, body: Bytes) -> ApiResult {
    let route = app
        .routes
        .resolve_switch(&name)
        .map_err(|e| ApiError::resolution(e, &app.routes))?;
    let state = requested_state(&body)?;

    let command = RelayControlRequest {
        switch_name: route.name.clone(),
        hat: route.board,
        relay: route.relay,
        state,
    };
    info!(switch = %route.name, node_id = %route.node_id, hat = route.board, relay = route.relay, state, "switch command");
    send_control(&app, &route.node_url, &command).await
}

async fn get_relay(
    State(app): State<AppState>,
    Path((pi_id, hat, relay_no)): Path<(String, String, String)>,
) -> ApiResult {
    let (url, hat, relay_no) = direct_target(&app.routes, &pi_id, &hat, &relay_no)?;
    let reply = app
        .forwarder
        .get(&url, &format!("/api/relay/{hat}/{relay_no}"))
        .await?;
    Ok(relay(reply))
}

async fn set_relay(
    State(app): State<AppState>,
    Path((pi_id, hat, relay_no)): Path<(String, String, String)>,
    body: Bytes,
) -> ApiResult {
    let (url, hat, relay_no) = direct_target(&app.routes, &pi_id, &hat, &relay_no)?;
    let state = requested_state(&body)?;

    let command = RelayControlRequest {
        switch_name: format!("{pi_id}_HAT{hat}_R{relay_no}"),
        hat,
        relay: relay_no,
        state,
    };
    info!(node_id = %pi_id, hat, relay = relay_no, state, "direct relay command");
    send_control(&app, &url, &command).await
}

async fn send_control(app: &AppState, node_url: &str, command: &RelayControlRequest) -> ApiResult {
    let body = serde_json::to_value(command).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let reply = app.forwarder.post(node_url, "/api/relay/control", &body).await?;
    Ok(relay(reply))
}

/// Validates a direct `node/board/relay` address against the node's
/// configured board count and the board capacity.
fn direct_target(
    routes: &RoutingTable,
    pi_id: &str,
    hat: &str,
    relay_no: &str,
) -> Result<(String, u32, u32), ApiError> {
    let node = routes
        .node(pi_id)
        .map_err(|e| ApiError::resolution(e, routes))?;

    let hat = hat
        .parse::<u32>()
        .ok()
        .filter(|h| *h < node.board_count)
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Invalid HAT number. Must be 0-{}",
                node.board_count - 1
            ))
        })?;

    let capacity = routes.board_capacity();
    let relay_no = relay_no
        .parse::<u32>()
        .ok()
        .filter(|r| (1..=capacity).contains(r))
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid relay number. Must be 1-{capacity}")))?;

    Ok((node.url.clone(), hat, relay_no))
}

fn requested_state(body: &[u8]) -> Result<u8, ApiError> {
    let payload: Value = serde_json::from_slice(body).map_err(|_| ApiError::missing_state())?;
    let state = payload.get("state").ok_or_else(ApiError::missing_state)?;
    parse_state(state).ok_or_else(ApiError::invalid_state)
}

async fn list_switches(State(app): State<AppState>) -> Json<Value> {
    let by_node = app.routes.switches_by_node();
    let queries = by_node.iter().map(|(node, _)| {
        let forwarder = app.forwarder.clone();
        async move { (*node, forwarder.get(&node.url, "/api/switch/list").await) }
    });

    let mut switches = Map::new();
    let mut errors = Vec::new();
    for (node, outcome) in join_all(queries).await {
        match outcome {
            Ok(reply) if reply.is_success() && reply.body.is_object() => {
                if let Some(found) = reply.body.get("switches").and_then(Value::as_object) {
                    switches.extend(found.clone());
                }
            }
            Ok(reply) => {
                let error = reply
                    .body
                    .get("error")
                    .cloned()
                    .unwrap_or_else(|| json!("Unknown error"));
                errors.push(json!({ "pi_id": node.node_id, "pi_url": node.url, "error": error }));
            }
            Err(e) => {
                warn!(node_id = %node.node_id, "switch list failed: {e}");
                errors.push(json!({ "pi_id": node.node_id, "pi_url": node.url, "error": e.to_string() }));
            }
        }
    }

    let mut result = json!({ "switches": switches });
    if !errors.is_empty() {
        result["errors"] = Value::Array(errors);
    }
    Json(result)
}

async fn chassis_switches(State(app): State<AppState>, Path(chassis): Path<String>) -> ApiResult {
    let max = app.routes.chassis_count();
    let chassis = chassis
        .parse::<u32>()
        .ok()
        .filter(|c| (1..=max).contains(c))
        .ok_or_else(|| ApiError::BadRequest(format!("Chassis number must be 1-{max}")))?;

    let node = app
        .routes
        .resolve_chassis(chassis)
        .map_err(|e| ApiError::resolution(e, &app.routes))?;
    let reply = app
        .forwarder
        .get(&node.url, &format!("/api/switch/chassis/{chassis}"))
        .await?;
    Ok(relay(reply))
}

fn query_limit(params: &HashMap<String, String>) -> usize {
    params
        .get("limit")
        .and_then(|l| l.trim().parse().ok())
        .unwrap_or(DEFAULT_QUERY_LIMIT)
}

fn pi_filter(params: &HashMap<String, String>) -> Option<&str> {
    params.get("pi_id").map(String::as_str).filter(|id| !id.is_empty())
}

async fn status_history(
    State(app): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let history = app.history.query(pi_filter(&params), query_limit(&params))?;
    Ok(Json(json!({ "count": history.len(), "history": history })))
}

async fn status_stats(
    State(app): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let stats = app.history.aggregate(pi_filter(&params))?;
    Ok(Json(json!({ "stats": stats })))
}
