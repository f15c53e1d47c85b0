/*!
Stub relay node

A real HTTP server on `127.0.0.1:0` that answers with scripted replies and
records every request it receives, so coordinator tests can run against
actual sockets without relay hardware.

Unscripted routes answer 404 `{"error": "not scripted"}`.
*/

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// One request as seen by the stub.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    /// Parsed JSON body, `None` when the body was empty or not JSON.
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
enum Payload {
    Json(Value),
    Text(String),
}

/// A scripted reply.
#[derive(Debug, Clone)]
pub struct StubResponse {
    status: u16,
    payload: Payload,
    delay: Option<Duration>,
}

impl StubResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            payload: Payload::Json(body),
            delay: None,
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            payload: Payload::Text(body.to_string()),
            delay: None,
        }
    }

    /// Holds the reply back, e.g. to provoke client timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match self.payload {
            Payload::Json(body) => (status, axum::Json(body)).into_response(),
            Payload::Text(text) => (status, text).into_response(),
        }
    }
}

#[derive(Default)]
struct StubInner {
    script: Mutex<HashMap<(String, String), StubResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Scripted relay node bound to a loopback port.
pub struct StubNode {
    addr: SocketAddr,
    inner: Arc<StubInner>,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl StubNode {
    pub async fn start() -> Result<Self> {
        let inner = Arc::new(StubInner::default());
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let app = Router::new().fallback(serve_scripted).with_state(inner.clone());
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = stopped.await;
            });
            if let Err(e) = serve.await {
                log::warn!("stub node on {addr} stopped: {e}");
            }
        });

        log::info!("🧪 [STUB] node listening on http://{addr}");
        Ok(Self {
            addr,
            inner,
            stop,
            handle,
        })
    }

    /// A stub that reports itself online for the given chassis.
    pub async fn online(chassis: &[u32]) -> Result<Self> {
        let node = Self::start().await?;
        node.respond(
            "GET",
            "/api/status",
            StubResponse::json(200, json!({ "status": "online", "chassis_controlled": chassis })),
        );
        Ok(node)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Scripts the reply for `method path`, replacing any earlier script.
    pub fn respond(&self, method: &str, path: &str, response: StubResponse) {
        self.inner
            .script
            .lock()
            .insert((method.to_ascii_uppercase(), path.to_string()), response);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.inner.requests.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.inner
            .requests
            .lock()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.inner.requests.lock().clear();
    }

    /// Stops accepting, lets in-flight replies finish, then returns.
    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        let _ = self.handle.await;
        log::info!("🧹 [STUB] node on {} stopped", self.addr);
    }
}

async fn serve_scripted(State(inner): State<Arc<StubInner>>, method: Method, uri: Uri, body: Bytes) -> Response {
    let path = uri.path().to_string();
    inner.requests.lock().push(RecordedRequest {
        method: method.to_string(),
        path: path.clone(),
        body: serde_json::from_slice(&body).ok(),
    });

    let scripted = inner
        .script
        .lock()
        .get(&(method.to_string(), path.clone()))
        .cloned();

    match scripted {
        Some(reply) => {
            if let Some(delay) = reply.delay {
                tokio::time::sleep(delay).await;
            }
            reply.into_response()
        }
        None => {
            log::debug!("[STUB] unscripted {method} {path}");
            (StatusCode::NOT_FOUND, axum::Json(json!({ "error": "not scripted" }))).into_response()
        }
    }
}

/// A loopback address nothing is listening on.
pub fn unused_local_addr() -> Result<SocketAddr> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_script_and_records_requests() {
        let node = StubNode::online(&[1, 2]).await.unwrap();
        let client = reqwest::Client::new();

        let status: Value = client
            .get(format!("{}/api/status", node.url()))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["chassis_controlled"], json!([1, 2]));

        let missing = client
            .post(format!("{}/api/relay/control", node.url()))
            .json(&json!({"state": 1}))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        let seen = node.requests();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].method, "POST");
        assert_eq!(seen[1].body, Some(json!({"state": 1})));
        assert_eq!(node.requests_to("/api/status").len(), 1);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn stopped_stub_refuses_connections() {
        let node = StubNode::start().await.unwrap();
        let url = node.url();
        node.shutdown().await;

        let err = reqwest::get(format!("{url}/api/status")).await.unwrap_err();
        assert!(err.is_connect());
    }
}
