//! A running replicated KV node.
//!
//! ## Key Responsibilities
//! - Serves the gateway's HTTP surface until shutdown
//! - Optionally serves Prometheus metrics
//! - Asks an existing cluster member for admission when configured to join
//! - Stops consensus participation once the request server has drained

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::error;
use tracing::info;
use tracing::Instrument;
use tracing::Span;

use super::join_cluster;
use crate::gateway;
use crate::metrics;
use crate::ConsensusEngine;
use crate::Error;
use crate::Gateway;
use crate::JoinRequest;
use crate::KvNodeConfig;
use crate::KvStore;
use crate::Result;

pub struct Node {
    pub(super) node_config: KvNodeConfig,
    pub(super) store: Arc<KvStore>,
    pub(super) engine: Arc<dyn ConsensusEngine>,
    pub(super) gateway: Arc<Gateway>,
    pub(super) span: Span,
}

impl std::fmt::Debug for Node {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("node_id", &self.node_config.cluster.node_id)
            .field("leader", &self.engine.is_leader())
            .finish()
    }
}

impl Node {
    pub fn config(&self) -> &KvNodeConfig {
        &self.node_config
    }

    pub fn store(&self) -> Arc<KvStore> {
        self.store.clone()
    }

    pub fn engine(&self) -> Arc<dyn ConsensusEngine> {
        self.engine.clone()
    }

    pub fn gateway(&self) -> Arc<Gateway> {
        self.gateway.clone()
    }

    /// Serves requests until the shutdown token fires.
    pub async fn run(&self) -> Result<()> {
        let (_, serving) = self.serve()?;
        serving.await
    }

    /// Binds the request server and starts the auxiliary tasks.
    ///
    /// Returns the bound address and a future that drives the server to
    /// completion, then shuts the engine down.
    pub fn serve(&self) -> Result<(SocketAddr, impl Future<Output = Result<()>> + Send + 'static)> {
        let _enter = self.span.enter();
        let token = self.gateway.shutdown_token();

        let (bound, server) = gateway::bind_server(self.gateway.clone(), self.node_config.gateway.listen_address)
            .map_err(|e| Error::Fatal(format!("request server: {e}")))?;

        let monitoring = &self.node_config.monitoring;
        if monitoring.prometheus_enabled {
            let port = monitoring.prometheus_port;
            let token = token.clone();
            tokio::spawn(
                async move {
                    if let Err(e) = metrics::start_server(port, token).await {
                        error!(%e, "Metrics server stopped");
                    }
                }
                .in_current_span(),
            );
        } else {
            metrics::register_custom_metrics();
        }

        let cluster = &self.node_config.cluster;
        if let Some(join_address) = cluster.join_address.clone() {
            let request = JoinRequest {
                id: cluster.node_id.clone(),
                address: cluster.raft_address.clone(),
            };
            let policy = cluster.join_retry;
            let token = token.clone();
            tokio::spawn(
                async move {
                    match join_cluster(&join_address, &request, policy, token).await {
                        Ok(()) => info!(%join_address, "Admitted to cluster"),
                        Err(e) => error!(%join_address, %e, "Failed to join cluster"),
                    }
                }
                .in_current_span(),
            );
        }

        let engine = self.engine.clone();
        let span = self.span.clone();
        let serving = async move {
            server.await;
            info!("Request server stopped");
            engine.shutdown().await?;
            Ok::<(), Error>(())
        }
        .instrument(span);

        Ok((bound, serving))
    }
}
