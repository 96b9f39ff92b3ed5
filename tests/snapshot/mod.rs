use tempfile::tempdir;

use crate::common::node_config;
use crate::common::start_node;
use crate::common::wait_until;

/// # Case 1: restart recovers from snapshot plus log suffix
///
/// ## Setup
/// 1. write keys, snapshot, write more keys
/// 2. stop and restart on the same directories
///
/// ## Validation criteria
/// - every committed write is visible after restart
/// - a snapshot file exists on disk
#[tokio::test]
async fn restart_recovers_snapshot_and_log_suffix() {
    let dir = tempdir().unwrap();
    let config = node_config(dir.path(), "n1", 19091);

    let running = start_node(config.clone()).await;
    let gateway = running.node.gateway();
    for i in 0..5 {
        gateway.insert(format!("k{i}"), format!("v{i}")).await.unwrap();
    }
    let covered = gateway.trigger_snapshot().await.unwrap();
    assert_eq!(covered.index, 5);

    let snapshot_dir = config.cluster.node_data_dir().join("snapshots");
    assert!(
        wait_until(|| snapshot_dir.join("snapshot-5-1.snap").exists()).await,
        "snapshot file not written"
    );

    gateway.update("k0", "changed").await.unwrap();
    gateway.delete("k4").await.unwrap();
    drop(gateway);
    running.stop().await;

    let restarted = start_node(config).await;
    let store = restarted.node.store();
    assert_eq!(store.get("k0"), Some("changed".to_string()));
    assert_eq!(store.get("k4"), None);
    for i in 1..4 {
        assert_eq!(store.get(&format!("k{i}")), Some(format!("v{i}")));
    }
    assert_eq!(store.len(), 4);

    // The restarted node keeps leading its single-member cluster
    restarted.node.gateway().insert("k5", "v5").await.unwrap();
    restarted.stop().await;
}
