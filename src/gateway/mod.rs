//! Gateway
//!
//! Request-facing translator between callers and the replicated store:
//! reads are answered from the local [`KvStore`], writes are encoded and
//! submitted to the [`ConsensusEngine`], and membership/snapshot/shutdown
//! requests are forwarded to the engine. Validation failures are reported
//! before the engine is contacted.

mod http;
pub use http::*;


use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;
use tracing::Instrument;
use tracing::Span;

use crate::metrics::GATEWAY_REQUESTS;
use crate::metrics::WRITE_LATENCY;
use crate::utils::net::validate_address;
use crate::ConsensusEngine;
use crate::GatewayConfig;
use crate::GatewayError;
use crate::KvStore;
use crate::LogId;
use crate::Operation;
use crate::ReadConsistency;

/// Body of a membership join request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Address")]
    pub address: String,
}

pub struct Gateway {
    engine: Arc<dyn ConsensusEngine>,
    store: Arc<KvStore>,
    config: GatewayConfig,
    shutdown: CancellationToken,
    span: Span,
}

impl std::fmt::Debug for Gateway {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

impl Gateway {
    pub fn new(
        engine: Arc<dyn ConsensusEngine>,
        store: Arc<KvStore>,
        config: GatewayConfig,
        shutdown: CancellationToken,
        span: Span,
    ) -> Self {
        Self {
            engine,
            store,
            config,
            shutdown,
            span,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Cancelled once [`Gateway::shutdown`] has run or the process is
    /// stopping. The HTTP server drains when it fires.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_accepting(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Reads `key` from the local store.
    ///
    /// With [`ReadConsistency::Stale`] any replica answers and the value may
    /// lag behind the leader. With [`ReadConsistency::Leader`] a follower
    /// rejects the read with a leader hint instead.
    pub fn read(
        &self,
        key: &str,
    ) -> Result<Option<String>, GatewayError> {
        let result = self.read_local(key);
        record("read", &result);
        result
    }

    fn read_local(
        &self,
        key: &str,
    ) -> Result<Option<String>, GatewayError> {
        validate_key(key)?;
        if self.config.read_consistency == ReadConsistency::Leader && !self.engine.is_leader() {
            return Err(GatewayError::NotLeader {
                leader: self.engine.leader(),
            });
        }
        Ok(self.store.get(key))
    }

    pub async fn insert(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<LogId, GatewayError> {
        self.write(Operation::insert(key, value)).await
    }

    pub async fn update(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<LogId, GatewayError> {
        self.write(Operation::update(key, value)).await
    }

    pub async fn delete(
        &self,
        key: impl Into<String>,
    ) -> Result<LogId, GatewayError> {
        self.write(Operation::delete(key)).await
    }

    /// Inserts every pair, one committed entry each, in key order.
    ///
    /// All keys are validated before anything is submitted. Stops at the
    /// first failed submission; pairs committed before it stay committed.
    pub async fn insert_all(
        &self,
        pairs: BTreeMap<String, String>,
    ) -> Result<Vec<LogId>, GatewayError> {
        if pairs.is_empty() {
            return Err(GatewayError::Validation("no key-value pairs supplied".to_string()));
        }
        for key in pairs.keys() {
            validate_key(key)?;
        }

        let mut committed = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            committed.push(self.write(Operation::insert(key, value)).await?);
        }
        Ok(committed)
    }

    /// Submits one operation and waits for its commit acknowledgement.
    ///
    /// A [`GatewayError::Timeout`] means the outcome is unknown: the entry
    /// may still commit later.
    pub async fn write(
        &self,
        op: Operation,
    ) -> Result<LogId, GatewayError> {
        let kind = op.kind();
        let started = Instant::now();
        let result = self.submit(op).instrument(self.span.clone()).await;
        if result.is_ok() {
            WRITE_LATENCY
                .with_label_values(&[kind])
                .observe(started.elapsed().as_secs_f64() * 1000.0);
        }
        record(kind, &result);
        result
    }

    async fn submit(
        &self,
        op: Operation,
    ) -> Result<LogId, GatewayError> {
        self.ensure_accepting()?;
        validate_key(op.key())?;

        let payload = op.encode()?;
        let timeout = self.config.apply_timeout();
        let log_id = self.engine.submit(payload, timeout).await.map_err(|e| {
            warn!(op = op.kind(), key = op.key(), %e, "Write rejected");
            GatewayError::from(e)
        })?;
        debug!(op = op.kind(), key = op.key(), ?log_id, "Write committed");
        Ok(log_id)
    }

    /// Admits a new voter. The address is checked before the engine is
    /// contacted.
    pub async fn join(
        &self,
        request: JoinRequest,
    ) -> Result<(), GatewayError> {
        let result = async {
            self.ensure_accepting()?;
            if request.id.trim().is_empty() {
                return Err(GatewayError::Validation("member id cannot be empty".to_string()));
            }
            validate_address(&request.address)
                .map_err(|reason| GatewayError::InvalidAddress(format!("{:?}: {}", request.address, reason)))?;

            self.engine
                .add_voter(request.id.clone(), request.address.clone())
                .await?;
            info!(id = %request.id, address = %request.address, "Join request accepted");
            Ok::<(), GatewayError>(())
        }
        .instrument(self.span.clone())
        .await;
        record("join", &result);
        result
    }

    /// Removes a member. Returns `false` when the id was not part of the
    /// configuration, which is not an error.
    pub async fn remove(
        &self,
        id: &str,
    ) -> Result<bool, GatewayError> {
        let result = async {
            self.ensure_accepting()?;
            if id.trim().is_empty() {
                return Err(GatewayError::Validation("member id cannot be empty".to_string()));
            }
            let removed = self.engine.remove_server(id.to_string()).await?;
            if removed {
                info!(%id, "Member removed");
            } else {
                warn!(%id, "Member not in configuration, nothing removed");
            }
            Ok::<bool, GatewayError>(removed)
        }
        .instrument(self.span.clone())
        .await;
        record("remove", &result);
        result
    }

    /// Asks the engine to snapshot. Success means the request was accepted;
    /// persistence finishes in the background.
    pub async fn trigger_snapshot(&self) -> Result<LogId, GatewayError> {
        let result = async {
            self.ensure_accepting()?;
            let log_id = self.engine.snapshot().await?;
            info!(?log_id, "Snapshot triggered");
            Ok::<LogId, GatewayError>(log_id)
        }
        .instrument(self.span.clone())
        .await;
        record("snapshot", &result);
        result
    }

    /// Stops consensus participation, then stops accepting requests.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<(), GatewayError> {
        if !self.is_accepting() {
            return Ok(());
        }
        let result = async {
            let engine_result = self.engine.shutdown().await;
            self.shutdown.cancel();
            match engine_result {
                Ok(()) => {
                    info!("Consensus participation stopped, request server draining");
                    Ok(())
                }
                Err(e) => {
                    warn!(%e, "Engine shutdown reported an error");
                    Err(GatewayError::Engine(e))
                }
            }
        }
        .instrument(self.span.clone())
        .await;
        record("shutdown", &result);
        result
    }

    fn ensure_accepting(&self) -> Result<(), GatewayError> {
        if !self.is_accepting() {
            return Err(GatewayError::ShuttingDown);
        }
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<(), GatewayError> {
    if key.is_empty() {
        return Err(GatewayError::Validation("key cannot be empty".to_string()));
    }
    Ok(())
}

fn record<T>(
    op: &str,
    result: &Result<T, GatewayError>,
) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.outcome(),
    };
    GATEWAY_REQUESTS.with_label_values(&[op, outcome]).inc();
}
