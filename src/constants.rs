use std::time::Duration;

// -
// Command opcodes carried in log payloads

pub(crate) const OP_INSERT: u8 = 1;
pub(crate) const OP_DELETE: u8 = 2;
pub(crate) const OP_UPDATE: u8 = 3;

/// Upper bound on a single decoded command payload
pub(crate) const MAX_COMMAND_BYTES: u64 = 16 * 1024 * 1024;

// -
// Database namespaces

/// Sled database tree namespaces
pub(crate) const RAFT_LOG_TREE: &str = "_raft_log";
pub(crate) const ENGINE_META_TREE: &str = "_engine_metadata";

/// Sled entry key namespaces
pub(crate) const META_KEY_CURRENT_TERM: &str = "_current_term";
pub(crate) const META_KEY_CONFIGURATION: &str = "_cluster_configuration";
pub(crate) const META_KEY_LAST_PURGED: &str = "_last_purged_log_id";

/// Snapshot files
pub(crate) const SNAPSHOT_FILE_PREFIX: &str = "snapshot-";
pub(crate) const SNAPSHOT_FILE_SUFFIX: &str = ".snap";
pub(crate) const SNAPSHOT_TEMP_PREFIX: &str = "temp-";

/// Per-node directory layout under `db_root_dir/<node_id>/`
pub(crate) const LOG_DB_DIR: &str = "raft_log";
pub(crate) const SNAPSHOT_DIR: &str = "snapshots";

/// Reference bound for a write waiting on commit acknowledgement
pub const DEFAULT_APPLY_TIMEOUT: Duration = Duration::from_secs(5);
