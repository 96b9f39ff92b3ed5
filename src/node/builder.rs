//! A builder pattern implementation for constructing a [`Node`].
//!
//! The builder performs the two-phase binding between the store and the
//! consensus engine: the [`KvStore`] is created first with no outward
//! handle, the engine is opened with the store as its state machine, and
//! the [`Gateway`] is finally handed both. The store never learns about the
//! engine; writes flow through the gateway.
//!
//! ## Example
//! ```ignore
//! let shutdown = CancellationToken::new();
//! let node = NodeBuilder::new(None, shutdown.clone())?
//!     .build()
//!     .await?;
//! node.run().await?;
//! ```

use std::fs;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::info_span;
use tracing::Span;

use crate::ClusterMember;
use crate::ConsensusEngine;
use crate::Error;
use crate::Gateway;
use crate::KvNodeConfig;
use crate::KvStore;
use crate::LocalEngine;
use crate::Node;
use crate::Result;
use crate::SystemError;

/// Builder for a [`Node`] with an optionally pre-built store and engine
pub struct NodeBuilder {
    pub(super) node_config: KvNodeConfig,
    pub(super) components: Option<(Arc<KvStore>, Arc<dyn ConsensusEngine>)>,
    pub(super) shutdown: CancellationToken,
}

impl NodeBuilder {
    /// Creates a builder with configuration loaded from `CONFIG_PATH` and
    /// `KV__` environment variables, plus an optional override file.
    pub fn new(
        config_path: Option<&str>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let mut node_config = KvNodeConfig::new()?;
        if let Some(p) = config_path {
            info!("with_override_config from: {}", &p);
            node_config = node_config.with_override_config(p)?;
        }
        Ok(Self::init(node_config.validate()?, shutdown))
    }

    /// Core initialization logic shared by all construction paths
    pub fn init(
        node_config: KvNodeConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            node_config,
            components: None,
            shutdown,
        }
    }

    /// Uses an externally constructed engine instead of [`LocalEngine`].
    /// `store` must be the state machine that `engine` delivers entries to.
    pub fn engine(
        mut self,
        store: Arc<KvStore>,
        engine: Arc<dyn ConsensusEngine>,
    ) -> Self {
        self.components = Some((store, engine));
        self
    }

    pub fn config(&self) -> &KvNodeConfig {
        &self.node_config
    }

    /// Replaces the entire node configuration
    pub fn node_config(
        mut self,
        node_config: KvNodeConfig,
    ) -> Self {
        self.node_config = node_config;
        self
    }

    /// Assembles the node.
    ///
    /// Failing to create the data directory or to open the engine's storage
    /// aborts startup with [`SystemError::NodeStartFailed`].
    pub async fn build(self) -> Result<Node> {
        let node_config = self.node_config;
        let cluster = &node_config.cluster;
        let span = info_span!("node", id = %cluster.node_id);

        let (store, engine) = match self.components {
            Some(components) => components,
            None => {
                let data_dir = cluster.node_data_dir();
                fs::create_dir_all(&data_dir).map_err(|e| {
                    SystemError::NodeStartFailed(format!("cannot create {}: {}", data_dir.display(), e))
                })?;

                let store = Arc::new(KvStore::new(span.clone()));
                let engine = LocalEngine::open(&node_config, store.clone(), span.clone())
                    .await
                    .map_err(|e| SystemError::NodeStartFailed(format!("engine failed to open: {e}")))?;
                (store, Arc::new(engine) as Arc<dyn ConsensusEngine>)
            }
        };

        if cluster.bootstrap && cluster.join_address.is_none() {
            bootstrap(engine.as_ref(), &node_config, &span).await?;
        }

        let gateway = Arc::new(Gateway::new(
            engine.clone(),
            store.clone(),
            node_config.gateway.clone(),
            self.shutdown.clone(),
            span.clone(),
        ));

        Ok(Node {
            node_config,
            store,
            engine,
            gateway,
            span,
        })
    }
}

async fn bootstrap(
    engine: &dyn ConsensusEngine,
    node_config: &KvNodeConfig,
    span: &Span,
) -> Result<()> {
    let local = ClusterMember::voter(&node_config.cluster.node_id, &node_config.cluster.raft_address);
    span.in_scope(|| info!(%local, "Bootstrapping single-member cluster"));
    engine
        .bootstrap(vec![local])
        .await
        .map_err(|e| Error::Fatal(format!("bootstrap failed: {e}")))
}
