#![allow(dead_code)]

use relay_coordinator::config::CoordinatorConfig;
use relay_coordinator::history::MemoryHistoryStore;
use relay_coordinator::Coordinator;
use relay_devkit::CoordinatorFixture;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A coordinator serving on loopback. The liveness monitor is not started;
/// tests drive sweeps explicitly through `coordinator.monitor.sweep()`.
pub struct TestCoordinator {
    pub url: String,
    pub coordinator: Coordinator,
    pub history: Arc<MemoryHistoryStore>,
    pub client: reqwest::Client,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestCoordinator {
    pub async fn start(fixture: CoordinatorFixture) -> anyhow::Result<Self> {
        relay_devkit::init_logging();
        let cfg = CoordinatorConfig::from_yaml(&fixture.to_yaml())?;
        let history = Arc::new(MemoryHistoryStore::new());
        let coordinator = Coordinator::new(&cfg, history.clone())?;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);
        let app = coordinator.router();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = stopped.await;
                })
                .await;
        });

        Ok(Self {
            url,
            coordinator,
            history,
            client: reqwest::Client::new(),
            stop,
            handle,
        })
    }

    pub async fn get(&self, path: &str) -> (u16, serde_json::Value) {
        let resp = self
            .client
            .get(format!("{}{path}", self.url))
            .send()
            .await
            .expect("coordinator reachable");
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(serde_json::Value::Null))
    }

    pub async fn post(&self, path: &str, body: serde_json::Value) -> (u16, serde_json::Value) {
        let resp = self
            .client
            .post(format!("{}{path}", self.url))
            .json(&body)
            .send()
            .await
            .expect("coordinator reachable");
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(serde_json::Value::Null))
    }

    pub async fn shutdown(self) {
        drop(self.client);
        let _ = self.stop.send(());
        let _ = self.handle.await;
    }
}
