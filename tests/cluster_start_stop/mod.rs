use reqwest::StatusCode;
use serde_json::json;
use serde_json::Value;
use tempfile::tempdir;

use crate::common::node_config;
use crate::common::start_node;

#[tokio::test]
async fn single_node_serves_full_request_surface() {
    let dir = tempdir().unwrap();
    let running = start_node(node_config(dir.path(), "n1", 19081)).await;
    let client = reqwest::Client::new();

    let res = client
        .post(running.url("/"))
        .json(&json!({"a": "1", "b": "2"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = client
        .patch(running.url("/a"))
        .json(&json!({"a": "10"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = client.get(running.url("/a")).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["value"], "10");

    let res = client.delete(running.url("/b")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = client.get(running.url("/b")).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["found"], false);

    let res = client
        .post(running.url("/join"))
        .json(&json!({"Id": "n9", "Address": "not-an-address"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(running.node.engine().members().len(), 1);

    let res = client.post(running.url("/snapshot")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let res = client.delete(running.url("/shutdown")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // The server drains on its own after /shutdown
    running.serving.await.unwrap().unwrap();
    assert!(!running.node.engine().is_leader());
}

#[tokio::test]
async fn writes_to_node_without_cluster_are_unavailable() {
    let dir = tempdir().unwrap();
    let mut config = node_config(dir.path(), "lonely", 19082);
    config.cluster.bootstrap = false;
    let running = start_node(config).await;

    let res = reqwest::Client::new()
        .post(running.url("/"))
        .json(&json!({"a": "1"}))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(running.node.store().is_empty());
    running.stop().await;
}
