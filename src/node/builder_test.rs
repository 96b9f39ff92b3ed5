use std::sync::Arc;

use tempfile::tempdir;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::test_utils::node_config;
use crate::utils::net::is_server_ready;
use crate::Error;
use crate::GatewayError;
use crate::KvStore;
use crate::MockConsensusEngine;
use crate::NodeBuilder;
use crate::SystemError;

#[tokio::test]
async fn build_with_defaults_bootstraps_local_engine() {
    let dir = tempdir().unwrap();
    let node = NodeBuilder::init(node_config(dir.path()), CancellationToken::new())
        .build()
        .await
        .unwrap();

    assert!(node.engine().is_leader());
    assert_eq!(node.engine().members().len(), 1);
    assert!(dir.path().join("db").join("node1").join("raft_log").exists());

    node.gateway().insert("a", "1").await.unwrap();
    assert_eq!(node.store().get("a"), Some("1".to_string()));
}

#[tokio::test]
async fn build_without_bootstrap_waits_to_be_admitted() {
    let dir = tempdir().unwrap();
    let mut config = node_config(dir.path());
    config.cluster.bootstrap = false;

    let node = NodeBuilder::init(config, CancellationToken::new()).build().await.unwrap();

    assert!(!node.engine().is_leader());
    assert!(matches!(
        node.gateway().insert("a", "1").await,
        Err(GatewayError::NotLeader { leader: None })
    ));
}

#[tokio::test]
async fn build_bootstraps_custom_engine_with_local_member() {
    let dir = tempdir().unwrap();
    let config = node_config(dir.path());
    let store = Arc::new(KvStore::new(Span::none()));

    let mut engine = MockConsensusEngine::new();
    engine
        .expect_bootstrap()
        .withf(|members| members.len() == 1 && members[0].id == "node1" && members[0].address == "127.0.0.1:9081")
        .times(1)
        .returning(|_| Ok(()));

    let node = NodeBuilder::init(config, CancellationToken::new())
        .engine(store.clone(), Arc::new(engine))
        .build()
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&node.store(), &store));
}

#[tokio::test]
async fn unusable_data_directory_aborts_startup() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let mut config = node_config(dir.path());
    config.cluster.db_root_dir = blocker.join("db");

    let result = NodeBuilder::init(config, CancellationToken::new()).build().await;

    assert!(matches!(
        result,
        Err(Error::System(SystemError::NodeStartFailed(_)))
    ));
}

#[tokio::test]
async fn serve_stops_when_token_is_cancelled() {
    let dir = tempdir().unwrap();
    let shutdown = CancellationToken::new();
    let node = NodeBuilder::init(node_config(dir.path()), shutdown.clone())
        .build()
        .await
        .unwrap();

    let (address, serving) = node.serve().unwrap();
    assert_ne!(address.port(), 0);
    let handle = tokio::spawn(serving);
    assert!(is_server_ready(&address.to_string()).await);

    shutdown.cancel();
    handle.await.unwrap().unwrap();

    assert!(!node.engine().is_leader());
}
