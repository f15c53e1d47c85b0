//! Outbound calls to relay nodes.
//!
//! Success responses are passed through untouched, whatever their status.
//! Network failures collapse into three outcomes: timeout (504), unreachable
//! (503) and any other transport error (500). Nothing is retried here; a
//! repeated relay command could apply a state change twice.

use axum::http::StatusCode;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub const UNREACHABLE_HINT: &str = "Check if Pi is online and accessible";

/// `url` is the node's base URL; `path` the endpoint that was called.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, path: String, timeout_secs: f64 },
    #[error("Could not connect to Pi at {url}")]
    Unreachable { url: String, path: String },
    #[error("Failed to communicate with Pi: {message}")]
    Transport { url: String, path: String, message: String },
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(Method),
}

impl ForwardError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ForwardError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ForwardError::Unreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ForwardError::Transport { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ForwardError::UnsupportedMethod(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            ForwardError::Timeout { url, .. }
            | ForwardError::Unreachable { url, .. }
            | ForwardError::Transport { url, .. } => Some(url),
            ForwardError::UnsupportedMethod(_) => None,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            ForwardError::Timeout { path, .. }
            | ForwardError::Unreachable { path, .. }
            | ForwardError::Transport { path, .. } => Some(path),
            ForwardError::UnsupportedMethod(_) => None,
        }
    }

    /// JSON error body returned to the caller.
    pub fn body(&self) -> Value {
        let mut body = json!({ "error": self.to_string() });
        if let Some(url) = self.url() {
            body["pi_url"] = json!(url);
        }
        if let Some(path) = self.path() {
            body["path"] = json!(path);
        }
        if matches!(self, ForwardError::Unreachable { .. }) {
            body["suggestion"] = json!(UNREACHABLE_HINT);
        }
        body
    }
}

/// A node response, whatever its status code.
#[derive(Debug, Clone, PartialEq)]
pub struct Forwarded {
    pub status: StatusCode,
    pub body: Value,
    /// False when the node's body was not JSON and `body` is `{"response": text}`.
    pub json: bool,
}

impl Forwarded {
    pub fn is_success(&self) -> bool {
        self.status == StatusCode::OK
    }
}

/// Stateless and cheap to clone; the inner client pools connections.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
    default_timeout: Duration,
}

impl Forwarder {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub async fn get(&self, base_url: &str, path: &str) -> Result<Forwarded, ForwardError> {
        self.forward(base_url, path, Method::GET, None, None).await
    }

    pub async fn post(
        &self,
        base_url: &str,
        path: &str,
        body: &Value,
    ) -> Result<Forwarded, ForwardError> {
        self.forward(base_url, path, Method::POST, Some(body), None).await
    }

    /// Sends one request to `base_url` + `path`. `timeout` overrides the
    /// configured default and bounds the whole exchange, body included.
    pub async fn forward(
        &self,
        base_url: &str,
        path: &str,
        method: Method,
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Forwarded, ForwardError> {
        let url = format!("{base_url}{path}");
        let timeout = timeout.unwrap_or(self.default_timeout);

        let request = match method {
            Method::GET => self.client.get(&url),
            Method::POST => {
                let builder = self.client.post(&url);
                match body {
                    Some(body) => builder.json(body),
                    None => builder,
                }
            }
            other => return Err(ForwardError::UnsupportedMethod(other)),
        };

        let exchange = async {
            let response = request.timeout(timeout).send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        let timed_out = || ForwardError::Timeout {
            url: base_url.to_string(),
            path: path.to_string(),
            timeout_secs: (timeout.as_secs_f64() * 1000.0).round() / 1000.0,
        };

        let (status, text) = match tokio::time::timeout(timeout, exchange).await {
            Err(_) => return Err(timed_out()),
            Ok(Err(e)) if e.is_timeout() => return Err(timed_out()),
            Ok(Err(e)) if e.is_connect() => {
                return Err(ForwardError::Unreachable {
                    url: base_url.to_string(),
                    path: path.to_string(),
                })
            }
            Ok(Err(e)) => {
                return Err(ForwardError::Transport {
                    url: base_url.to_string(),
                    path: path.to_string(),
                    message: e.to_string(),
                })
            }
            Ok(Ok(reply)) => reply,
        };

        debug!(%url, status = status.as_u16(), "node replied");
        let (body, json) = match serde_json::from_str(&text) {
            Ok(body) => (body, true),
            Err(_) => (json!({ "response": text }), false),
        };
        Ok(Forwarded {
            status: StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
            body,
            json,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_devkit::{unused_local_addr, StubNode, StubResponse};

    #[tokio::test]
    async fn passes_node_replies_through_unchanged() {
        let node = StubNode::start().await.unwrap();
        node.respond("POST", "/api/relay/control", StubResponse::json(409, json!({"error": "busy"})));

        let fwd = Forwarder::new(Duration::from_secs(2));
        let reply = fwd
            .post(&node.url(), "/api/relay/control", &json!({"state": 1}))
            .await
            .unwrap();

        assert_eq!(reply.status, StatusCode::CONFLICT);
        assert_eq!(reply.body, json!({"error": "busy"}));
        assert!(reply.json);
        assert_eq!(node.requests()[0].body, Some(json!({"state": 1})));
        node.shutdown().await;
    }

    #[tokio::test]
    async fn non_json_replies_are_wrapped() {
        let node = StubNode::start().await.unwrap();
        node.respond("GET", "/api/switch/list", StubResponse::text(200, "plain"));
        node.respond("GET", "/api/status", StubResponse::json(503, json!({"response": "plain"})));

        let fwd = Forwarder::new(Duration::from_secs(2));
        let reply = fwd.get(&node.url(), "/api/switch/list").await.unwrap();
        assert_eq!(reply.body, json!({"response": "plain"}));
        assert!(!reply.json);

        // same shape, but sent as JSON by the node
        let reply = fwd.get(&node.url(), "/api/status").await.unwrap();
        assert_eq!(reply.body, json!({"response": "plain"}));
        assert!(reply.json);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn slow_node_is_a_timeout() {
        let node = StubNode::start().await.unwrap();
        node.respond(
            "GET",
            "/api/status",
            StubResponse::json(200, json!({"status": "online"})).with_delay(Duration::from_millis(500)),
        );

        let err = Forwarder::new(Duration::from_secs(5))
            .forward(&node.url(), "/api/status", Method::GET, None, Some(Duration::from_millis(100)))
            .await
            .unwrap_err();

        assert!(matches!(err, ForwardError::Timeout { .. }), "{err:?}");
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        let body = err.body();
        assert_eq!(body["error"], json!(format!("Request to {} timed out after 0.1s", node.url())));
        assert_eq!(body["pi_url"], json!(node.url()));
        assert_eq!(body["path"], json!("/api/status"));
        node.shutdown().await;
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let url = format!("http://{}", unused_local_addr().unwrap());
        let err = Forwarder::new(Duration::from_secs(2))
            .get(&url, "/api/status")
            .await
            .unwrap_err();

        assert!(matches!(err, ForwardError::Unreachable { .. }), "{err:?}");
        let body = err.body();
        assert_eq!(body["suggestion"], json!(UNREACHABLE_HINT));
        assert_eq!(body["pi_url"], json!(url));
        assert_eq!(body["path"], json!("/api/status"));
    }

    #[tokio::test]
    async fn malformed_url_is_a_transport_failure() {
        let err = Forwarder::new(Duration::from_secs(1))
            .get("http://bad host", "/api/status")
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::Transport { .. }), "{err:?}");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn only_get_and_post_are_forwarded() {
        let err = Forwarder::new(Duration::from_secs(1))
            .forward("http://127.0.0.1:1", "/x", Method::DELETE, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.body().get("pi_url").is_none());
    }
}
