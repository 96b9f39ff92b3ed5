//! Replicated KV Store Error Hierarchy
//!
//! Errors are grouped by the layer that produces them: the command codec,
//! the state machine (apply/snapshot/restore), the consensus engine, and the
//! request gateway. Everything funnels into [`Error`] at the process edge.

use std::path::PathBuf;
use std::time::Duration;

use config::ConfigError;

use crate::ClusterMember;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (network, storage)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Node configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Failures surfaced by the consensus engine
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Failures surfaced by the request gateway
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Node failed to start: {0}")]
    NodeStartFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Request server could not bind its listen address
    #[error("Failed to bind {address}: {reason}")]
    BindFailed { address: String, reason: String },

    /// Outbound HTTP request failure
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// A peer answered a join request with a non-success status
    #[error("Join rejected by {address} (status {status}): {body}")]
    JoinRejected {
        address: String,
        status: u16,
        body: String,
    },

    /// Retry policy exhaustion
    #[error("Retry timeout after {0} attempts")]
    RetryExhausted(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Disk I/O failures during log/snapshot operations
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("Error occurred at path: {path}")]
    PathError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Serialization failures for persisted data
    #[error(transparent)]
    BincodeError(#[from] bincode::Error),

    /// Embedded database errors
    #[error("Embedded database error: {0}")]
    DbError(String),

    /// Persisted data that cannot be interpreted
    #[error("Data corruption detected at {location}")]
    DataCorruption { location: String },
}

/// Failure to turn a log payload back into an operation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed command payload: {0}")]
    Malformed(String),

    #[error("unknown operation tag: {0}")]
    UnknownOp(u8),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("command exceeds {limit} bytes: {reason}")]
    TooLarge { limit: u64, reason: String },
}

/// Failure to apply a committed entry. The store is left untouched.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("entry {index} (term {term}) is malformed: {reason}")]
    Malformed { index: u64, term: u64, reason: String },

    #[error("entry {index} (term {term}) carries unknown operation tag {op}")]
    UnknownOp { index: u64, term: u64, op: u8 },
}

#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("snapshot payload is malformed: {0}")]
    Malformed(String),

    #[error("failed to read snapshot: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot serialization failed: {0}")]
    Serialize(#[from] bincode::Error),

    #[error("snapshot write failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Write or membership request reached a replica that is not the leader
    #[error("Not cluster leader (known leader: {leader:?})")]
    NotLeader { leader: Option<ClusterMember> },

    /// Commit acknowledgement not received in time; outcome unknown
    #[error("Commit not acknowledged within {0:?}")]
    Timeout(Duration),

    #[error("Consensus engine is shut down")]
    Shutdown,

    #[error("Membership change failed: {0}")]
    Membership(String),

    /// The entry committed but the state machine rejected it
    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Snapshot operation failed: {0}")]
    Snapshot(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Empty key/id and other request-shape problems
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("invalid member address: {0}")]
    InvalidAddress(String),

    /// Request body that does not parse
    #[error("malformed request body: {0}")]
    Malformed(String),

    #[error("not the cluster leader (known leader: {leader:?})")]
    NotLeader { leader: Option<ClusterMember> },

    /// The write may or may not eventually commit
    #[error("write not acknowledged within {0:?}; outcome unknown")]
    Timeout(Duration),

    #[error("node is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Engine(EngineError),
}

impl GatewayError {
    /// True for errors raised before the consensus engine was contacted.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            GatewayError::Validation(_) | GatewayError::InvalidAddress(_) | GatewayError::Malformed(_)
        )
    }

    /// Short label used in metrics and response bodies
    pub fn outcome(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation",
            GatewayError::InvalidAddress(_) => "invalid_address",
            GatewayError::Malformed(_) => "malformed",
            GatewayError::NotLeader { .. } => "not_leader",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::ShuttingDown => "shutting_down",
            GatewayError::Engine(_) => "engine",
        }
    }
}

// ============== Conversion Implementations ============== //
impl From<EngineError> for GatewayError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotLeader { leader } => GatewayError::NotLeader { leader },
            EngineError::Timeout(d) => GatewayError::Timeout(d),
            EngineError::Shutdown => GatewayError::ShuttingDown,
            other => GatewayError::Engine(other),
        }
    }
}

impl From<EncodeError> for GatewayError {
    fn from(e: EncodeError) -> Self {
        GatewayError::Validation(e.to_string())
    }
}

impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::System(SystemError::Network(e))
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::System(SystemError::Storage(e))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        NetworkError::Http(err).into()
    }
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::DbError(err.to_string())
    }
}

impl From<sled::Error> for EngineError {
    fn from(err: sled::Error) -> Self {
        EngineError::Storage(err.into())
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        StorageError::from(err).into()
    }
}
