use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use raft_kv::KvNodeConfig;
use raft_kv::Node;
use raft_kv::NodeBuilder;
use raft_kv::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const WAIT_FOR_CONDITION: Duration = Duration::from_secs(5);

/// Node config rooted in `dir`, serving on an ephemeral port
pub fn node_config(
    dir: &Path,
    node_id: &str,
    raft_port: u16,
) -> KvNodeConfig {
    let mut config = KvNodeConfig::default();
    config.cluster.node_id = node_id.to_string();
    config.cluster.raft_address = format!("127.0.0.1:{raft_port}");
    config.cluster.db_root_dir = dir.join("db");
    config.cluster.log_dir = dir.join("logs");
    config.gateway.listen_address = ([127, 0, 0, 1], 0).into();
    config
}

/// A node serving HTTP in the background
pub struct RunningNode {
    pub node: Node,
    pub address: SocketAddr,
    pub shutdown: CancellationToken,
    pub serving: JoinHandle<Result<()>>,
}

impl RunningNode {
    pub fn url(
        &self,
        path: &str,
    ) -> String {
        format!("http://{}{}", self.address, path)
    }

    /// Cancels the token and waits until the engine has stopped
    pub async fn stop(self) -> Node {
        self.shutdown.cancel();
        self.serving.await.expect("serving task").expect("clean shutdown");
        self.node
    }
}

pub async fn start_node(config: KvNodeConfig) -> RunningNode {
    let shutdown = CancellationToken::new();
    let node = NodeBuilder::init(config, shutdown.clone())
        .build()
        .await
        .expect("node builds");
    let (address, serving) = node.serve().expect("node serves");
    RunningNode {
        node,
        address,
        shutdown,
        serving: tokio::spawn(serving),
    }
}

/// Polls `condition` until it holds or [`WAIT_FOR_CONDITION`] elapses
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT_FOR_CONDITION;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
