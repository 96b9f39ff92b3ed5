use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;

/// Parameters of the bundled [`crate::LocalEngine`]
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EngineConfig {
    /// Number of snapshot files kept on disk
    #[serde(default = "default_snapshot_retain")]
    pub snapshot_retain: usize,

    /// Applied entries since the last snapshot that trigger a new one.
    /// 0 disables automatic snapshots.
    #[serde(default = "default_snapshot_threshold")]
    pub snapshot_threshold: u64,

    /// Depth of the queue in front of the sequencing task
    #[serde(default = "default_proposal_buffer")]
    pub proposal_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_retain: default_snapshot_retain(),
            snapshot_threshold: default_snapshot_threshold(),
            proposal_buffer: default_proposal_buffer(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.snapshot_retain == 0 {
            return Err(invalid("engine.snapshot_retain must be at least 1"));
        }
        if self.proposal_buffer == 0 {
            return Err(invalid("engine.proposal_buffer must be at least 1"));
        }
        Ok(())
    }
}

fn default_snapshot_retain() -> usize {
    2
}
fn default_snapshot_threshold() -> u64 {
    8192
}
fn default_proposal_buffer() -> usize {
    1024
}
