use relay_coordinator::models::NodeState;
use relay_devkit::{unused_local_addr, CoordinatorFixture, NodeFixture, StubNode, StubResponse};
use serde_json::json;
use std::time::Duration;

mod common;
use common::TestCoordinator;

#[tokio::test]
async fn offline_node_yields_503_and_status_changes_only_on_sweep() -> anyhow::Result<()> {
    let dead = unused_local_addr()?;
    let coord = TestCoordinator::start(
        CoordinatorFixture::new().node(NodeFixture::new("pi_1", dead, &[1])),
    )
    .await?;

    let (status, body) = coord.post("/api/switch/CH1", json!({"state": 1})).await;
    assert_eq!(status, 503);
    assert_eq!(body["error"], format!("Could not connect to Pi at http://{dead}"));
    assert_eq!(body["suggestion"], "Check if Pi is online and accessible");
    assert_eq!(body["pi_url"], format!("http://{dead}"));
    assert_eq!(body["path"], "/api/relay/control");

    let cache = &coord.coordinator.state.cache;
    assert_eq!(cache.state_of("pi_1"), NodeState::Unknown);
    assert!(coord.history.is_empty());

    coord.coordinator.monitor.sweep().await;
    assert_eq!(cache.state_of("pi_1"), NodeState::Offline);
    assert_eq!(coord.history.len(), 1);

    coord.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn slow_node_yields_504() -> anyhow::Result<()> {
    let node = StubNode::online(&[1]).await?;
    node.respond(
        "POST",
        "/api/relay/control",
        StubResponse::json(200, json!({"success": true})).with_delay(Duration::from_millis(1500)),
    );
    let coord = TestCoordinator::start(
        CoordinatorFixture::new()
            .request_timeout(0.3)
            .node(NodeFixture::new("pi_1", node.addr(), &[1])),
    )
    .await?;

    let (status, body) = coord.post("/api/switch/CH1C", json!({"state": 0})).await;
    assert_eq!(status, 504);
    assert_eq!(body["error"], format!("Request to {} timed out after 0.3s", node.url()));
    assert_eq!(body["pi_url"], node.url());
    assert_eq!(node.requests_to("/api/relay/control").len(), 1, "no retry");
    assert_eq!(coord.coordinator.state.cache.state_of("pi_1"), NodeState::Unknown);

    coord.shutdown().await;
    node.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn node_errors_pass_through_unchanged() -> anyhow::Result<()> {
    let node = StubNode::online(&[1]).await?;
    node.respond(
        "POST",
        "/api/relay/control",
        StubResponse::json(500, json!({"success": false, "error": "I2C bus error"})),
    );
    let coord = TestCoordinator::start(
        CoordinatorFixture::new().node(NodeFixture::new("pi_1", node.addr(), &[1])),
    )
    .await?;

    let (status, body) = coord.post("/api/switch/CH1", json!({"state": 1})).await;
    assert_eq!(status, 500);
    assert_eq!(body, json!({"success": false, "error": "I2C bus error"}));

    coord.shutdown().await;
    node.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn switch_list_merges_nodes_and_reports_failures() -> anyhow::Result<()> {
    let up = StubNode::online(&[1]).await?;
    up.respond(
        "GET",
        "/api/switch/list",
        StubResponse::json(
            200,
            json!({"switches": {
                "CH1": {"hat": 0, "relay": 1, "state": 0, "status": "OFF"},
                "CH1A": {"hat": 0, "relay": 2, "state": 1, "status": "ON"}
            }}),
        ),
    );
    let dead = unused_local_addr()?;
    let coord = TestCoordinator::start(
        CoordinatorFixture::new()
            .node(NodeFixture::new("pi_1", up.addr(), &[1]))
            .node(NodeFixture::new("pi_2", dead, &[2])),
    )
    .await?;

    let (status, body) = coord.get("/api/switch/list").await;
    assert_eq!(status, 200);
    assert_eq!(body["switches"]["CH1A"]["status"], "ON");
    assert_eq!(body["switches"].as_object().unwrap().len(), 2);

    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["pi_id"], "pi_2");
    assert_eq!(errors[0]["pi_url"], format!("http://{dead}"));
    assert_eq!(up.requests_to("/api/switch/list").len(), 1);

    coord.shutdown().await;
    up.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn complete_switch_list_has_no_errors_field() -> anyhow::Result<()> {
    let up = StubNode::online(&[1]).await?;
    up.respond("GET", "/api/switch/list", StubResponse::json(200, json!({"switches": {}})));
    let coord = TestCoordinator::start(
        CoordinatorFixture::new().node(NodeFixture::new("pi_1", up.addr(), &[1])),
    )
    .await?;

    let (_, body) = coord.get("/api/switch/list").await;
    assert_eq!(body, json!({"switches": {}}));

    coord.shutdown().await;
    up.shutdown().await;
    Ok(())
}
