use tempfile::tempdir;

use crate::common::node_config;
use crate::common::start_node;
use crate::common::wait_until;

#[tokio::test]
async fn new_node_joins_existing_cluster_over_http() {
    let dir = tempdir().unwrap();
    let leader = start_node(node_config(dir.path(), "n1", 19101)).await;

    let mut config = node_config(dir.path(), "n2", 19102);
    config.cluster.bootstrap = false;
    config.cluster.join_address = Some(leader.address.to_string());
    config.cluster.join_retry.base_delay_ms = 10;
    let joiner = start_node(config).await;

    let engine = leader.node.engine();
    let admitted = wait_until(|| engine.members().iter().any(|m| m.id == "n2" && m.address == "127.0.0.1:19102")).await;
    assert!(admitted, "n2 was not admitted: {:?}", engine.members());

    joiner.stop().await;
    leader.stop().await;
}
