//! Consensus engine contract
//!
//! The replicated store treats leader election, log replication and commit
//! acknowledgement as an external collaborator. [`ConsensusEngine`] is the
//! narrow surface the gateway and the node orchestrator rely on; the engine
//! in turn drives a [`crate::StateMachine`] with committed [`Entry`]s.
//!
//! [`LocalEngine`] is the bundled single-process implementation.

mod local_engine;
pub use local_engine::*;


use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use crate::EngineError;

/// Position of an entry in the replicated log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogId {
    pub index: u64,
    pub term: u64,
}

/// A committed command in the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub index: u64,
    pub term: u64,
    pub payload: Vec<u8>,
}

impl Entry {
    pub fn log_id(&self) -> LogId {
        LogId {
            index: self.index,
            term: self.term,
        }
    }
}

/// A member of the engine's cluster configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterMember {
    pub id: String,
    pub address: String,
    pub voter: bool,
}

impl ClusterMember {
    pub fn voter(
        id: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            voter: true,
        }
    }
}

impl fmt::Display for ClusterMember {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConsensusEngine: Send + Sync + 'static {
    /// Forms a brand-new cluster from `members`. A node that already holds
    /// cluster state keeps it and reports success.
    async fn bootstrap(
        &self,
        members: Vec<ClusterMember>,
    ) -> Result<(), EngineError>;

    /// Submits an encoded command and waits until it is committed and applied
    /// locally, or `timeout` elapses.
    async fn submit(
        &self,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<LogId, EngineError>;

    async fn add_voter(
        &self,
        id: String,
        address: String,
    ) -> Result<(), EngineError>;

    /// Returns `false` when `id` was not part of the configuration.
    async fn remove_server(
        &self,
        id: String,
    ) -> Result<bool, EngineError>;

    /// Asks the engine to snapshot now. Resolves once the request is accepted,
    /// with the log position the snapshot covers.
    async fn snapshot(&self) -> Result<LogId, EngineError>;

    /// Stops participating in the cluster. Idempotent.
    async fn shutdown(&self) -> Result<(), EngineError>;

    fn is_leader(&self) -> bool;

    fn leader(&self) -> Option<ClusterMember>;

    fn members(&self) -> Vec<ClusterMember>;
}
