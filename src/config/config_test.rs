use std::time::Duration;

use serial_test::serial;
use temp_env::with_vars;

use super::*;

fn cleanup_all_kv_env_vars() {
    for (key, _) in std::env::vars() {
        if key.starts_with("KV__") || key == "CONFIG_PATH" {
            std::env::remove_var(&key);
        }
    }
}

#[test]
#[serial]
fn default_config_should_initialize_with_hardcoded_values() {
    let config = KvNodeConfig::default();

    assert_eq!(config.cluster.node_id, "node1");
    assert!(config.cluster.bootstrap);
    assert!(config.cluster.join_address.is_none());
    assert_eq!(config.gateway.apply_timeout(), Duration::from_secs(5));
    assert_eq!(config.gateway.read_consistency, ReadConsistency::Stale);
    assert_eq!(config.engine.snapshot_retain, 2);
    assert_eq!(config.engine.snapshot_threshold, 8192);
    assert!(!config.monitoring.prometheus_enabled);
}

#[test]
#[serial]
fn new_should_merge_environment_overrides() {
    cleanup_all_kv_env_vars();
    with_vars(
        vec![
            ("KV__GATEWAY__APPLY_TIMEOUT_MS", Some("250")),
            ("KV__GATEWAY__READ_CONSISTENCY", Some("leader")),
            ("KV__CLUSTER__NODE_ID", Some("node7")),
        ],
        || {
            let config = KvNodeConfig::new().unwrap();

            assert_eq!(config.gateway.apply_timeout_ms, 250);
            assert_eq!(config.gateway.read_consistency, ReadConsistency::Leader);
            assert_eq!(config.cluster.node_id, "node7");
        },
    );
}

#[test]
#[serial]
fn with_override_config_should_merge_file_settings() {
    cleanup_all_kv_env_vars();
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("dynamic_config.toml");

    std::fs::write(
        &config_path,
        r#"
        [cluster]
        db_root_dir = "/tmp/xx/db"
        bootstrap = false
        join_address = "10.0.0.1:9080"

        [engine]
        snapshot_threshold = 16
        "#,
    )
    .unwrap();

    let empty_vars: Vec<(&str, Option<&str>)> = vec![];
    with_vars(empty_vars, || {
        let base_config = KvNodeConfig::new().expect("success");
        let config = base_config.with_override_config(config_path.to_str().unwrap()).unwrap();

        assert_eq!(config.cluster.db_root_dir.as_os_str().to_str(), Some("/tmp/xx/db"));
        assert!(!config.cluster.bootstrap);
        assert_eq!(config.cluster.join_address.as_deref(), Some("10.0.0.1:9080"));
        assert_eq!(config.engine.snapshot_threshold, 16);
        // untouched sections keep their defaults
        assert_eq!(config.engine.snapshot_retain, 2);
        assert!(config.validate().is_ok());
    });
}

#[test]
#[serial]
fn environment_variables_should_have_highest_priority() {
    cleanup_all_kv_env_vars();
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("test_config.toml");
    std::fs::write(
        &config_path,
        r#"
        [cluster]
        node_id = "from-file"
        raft_address = "127.0.0.1:7001"
        "#,
    )
    .unwrap();

    with_vars(
        vec![
            ("CONFIG_PATH", Some(config_path.to_str().unwrap())),
            ("KV__CLUSTER__NODE_ID", Some("from-env")),
        ],
        || {
            let config = KvNodeConfig::new().unwrap();
            assert_eq!(config.cluster.node_id, "from-env");
            assert_eq!(config.cluster.raft_address, "127.0.0.1:7001");
        },
    );
}

#[test]
#[serial]
fn missing_config_path_file_should_fail() {
    cleanup_all_kv_env_vars();
    with_vars(vec![("CONFIG_PATH", Some("/definitely/not/here.toml"))], || {
        assert!(KvNodeConfig::new().is_err());
    });
}

#[test]
fn validation_should_accept_defaults() {
    assert!(KvNodeConfig::default().validate().is_ok());
}

#[test]
fn validation_should_fail_with_empty_node_id() {
    let mut config = KvNodeConfig::default();
    config.cluster.node_id = "  ".to_string();

    assert!(config.validate().is_err());
}

#[test]
fn validation_should_fail_with_path_like_node_id() {
    let mut config = KvNodeConfig::default();
    config.cluster.node_id = "../escape".to_string();

    assert!(config.validate().is_err());
}

#[test]
fn validation_should_fail_with_invalid_raft_address() {
    let mut config = KvNodeConfig::default();
    config.cluster.raft_address = "not-an-address".to_string();

    assert!(config.validate().is_err());
}

#[test]
fn validation_should_reject_bootstrap_with_join_address() {
    let mut config = KvNodeConfig::default();
    config.cluster.bootstrap = true;
    config.cluster.join_address = Some("127.0.0.1:9080".to_string());

    assert!(config.validate().is_err());
}

#[test]
fn validation_should_reject_invalid_join_address() {
    let mut config = KvNodeConfig::default();
    config.cluster.bootstrap = false;
    config.cluster.join_address = Some("nowhere".to_string());

    assert!(config.validate().is_err());
}

#[test]
fn validation_should_reject_zero_apply_timeout() {
    let mut config = KvNodeConfig::default();
    config.gateway.apply_timeout_ms = 0;

    assert!(config.validate().is_err());
}

#[test]
fn validation_should_reject_zero_snapshot_retain() {
    let mut config = KvNodeConfig::default();
    config.engine.snapshot_retain = 0;

    assert!(config.validate().is_err());
}

#[test]
fn validation_should_reject_privileged_prometheus_port() {
    let mut config = KvNodeConfig::default();
    config.monitoring.prometheus_enabled = true;
    config.monitoring.prometheus_port = 80;

    assert!(config.validate().is_err());
}

#[test]
fn backoff_delay_should_grow_and_cap() {
    let policy = BackoffPolicy {
        max_retries: 5,
        timeout_ms: 100,
        base_delay_ms: 50,
        max_delay_ms: 300,
    };

    assert_eq!(policy.delay(0), Duration::from_millis(50));
    assert_eq!(policy.delay(1), Duration::from_millis(100));
    assert_eq!(policy.delay(2), Duration::from_millis(200));
    assert_eq!(policy.delay(3), Duration::from_millis(300));
    assert_eq!(policy.delay(60), Duration::from_millis(300));
}

#[test]
fn backoff_validation_should_reject_inverted_delays() {
    let policy = BackoffPolicy {
        max_retries: 1,
        timeout_ms: 100,
        base_delay_ms: 500,
        max_delay_ms: 100,
    };

    assert!(policy.validate("test").is_err());
}
