use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use super::validate_directory;
use super::BackoffPolicy;
use crate::utils::net::validate_address;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClusterConfig {
    /// Identity of this node inside the engine's configuration
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Address the consensus engine's transport is reachable on
    #[serde(default = "default_raft_address")]
    pub raft_address: String,

    #[serde(default = "default_db_dir")]
    pub db_root_dir: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Form a brand-new single-member cluster on first start
    #[serde(default = "default_bootstrap")]
    pub bootstrap: bool,

    /// Request address of an existing member to ask for admission
    #[serde(default)]
    pub join_address: Option<String>,

    #[serde(default = "default_join_retry")]
    pub join_retry: BackoffPolicy,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            raft_address: default_raft_address(),
            db_root_dir: default_db_dir(),
            log_dir: default_log_dir(),
            bootstrap: default_bootstrap(),
            join_address: None,
            join_retry: default_join_retry(),
        }
    }
}

impl ClusterConfig {
    /// Validates cluster configuration consistency
    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(invalid("node_id cannot be empty"));
        }
        // The id names the per-node data directory
        if self.node_id.contains(['/', '\\']) || self.node_id == "." || self.node_id == ".." {
            return Err(invalid(format!("node_id {:?} is not a valid directory name", self.node_id)));
        }

        validate_address(&self.raft_address)
            .map_err(|reason| invalid(format!("raft_address {:?}: {}", self.raft_address, reason)))?;

        if let Some(join_address) = &self.join_address {
            if self.bootstrap {
                return Err(invalid("bootstrap and join_address are mutually exclusive"));
            }
            validate_address(join_address)
                .map_err(|reason| invalid(format!("join_address {join_address:?}: {reason}")))?;
        }

        self.join_retry.validate("cluster.join_retry")?;

        validate_directory(&self.db_root_dir, "db_root_dir")?;
        validate_directory(&self.log_dir, "log_dir")?;

        Ok(())
    }

    /// Per-node directory holding the log, metadata and snapshots
    pub fn node_data_dir(&self) -> PathBuf {
        self.db_root_dir.join(&self.node_id)
    }
}

fn default_node_id() -> String {
    "node1".to_string()
}
fn default_raft_address() -> String {
    "127.0.0.1:9081".to_string()
}
fn default_db_dir() -> PathBuf {
    PathBuf::from("/tmp/raft-kv/db")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("/tmp/raft-kv/logs")
}
fn default_bootstrap() -> bool {
    true
}
fn default_join_retry() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 10,
        timeout_ms: 5000,
        base_delay_ms: 500,
        max_delay_ms: 10000,
    }
}
