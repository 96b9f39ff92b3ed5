use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::constants::DEFAULT_APPLY_TIMEOUT;
use crate::Result;

/// Which replicas may answer a read
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadConsistency {
    /// Any replica answers from its local store; the value may be stale
    #[default]
    Stale,
    /// Only the leader answers; followers reject with a not-leader error
    Leader,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: SocketAddr,

    /// Bound on waiting for a write's commit acknowledgement
    #[serde(default = "default_apply_timeout_ms")]
    pub apply_timeout_ms: u64,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,

    #[serde(default)]
    pub read_consistency: ReadConsistency,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            apply_timeout_ms: default_apply_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
            read_consistency: ReadConsistency::default(),
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.apply_timeout_ms == 0 {
            return Err(invalid("gateway.apply_timeout_ms must be greater than 0"));
        }
        if self.max_body_bytes == 0 {
            return Err(invalid("gateway.max_body_bytes must be greater than 0"));
        }
        Ok(())
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_millis(self.apply_timeout_ms)
    }
}

fn default_listen_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9080))
}
fn default_apply_timeout_ms() -> u64 {
    DEFAULT_APPLY_TIMEOUT.as_millis() as u64
}
fn default_max_body_bytes() -> u64 {
    64 * 1024
}
