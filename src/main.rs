use std::fs;
use std::path::Path;

use raft_kv::Error;
use raft_kv::NodeBuilder;
use raft_kv::Result;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    // Optional override file as the first argument, on top of CONFIG_PATH
    let override_path = std::env::args().nth(1);

    // Initializing Shutdown Signal
    let shutdown = CancellationToken::new();

    let builder = NodeBuilder::new(override_path.as_deref(), shutdown.clone())?;
    let cluster = &builder.config().cluster;

    // Initializing Logs
    let _guard = init_observability(&cluster.node_id, &cluster.log_dir)?;

    let node = builder.build().await?;
    info!(node = ?node, "Application started. Waiting for CTRL+C signal...");

    // Listen on Shutdown Signal
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = graceful_shutdown(signal_token).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    // Start Node
    if let Err(e) = node.run().await {
        error!("node stops: {:?}", e);
        return Err(e);
    }

    info!("Exiting program.");
    Ok(())
}

async fn graceful_shutdown(shutdown: CancellationToken) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| Error::Fatal(format!("sigint handler: {e}")))?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| Error::Fatal(format!("sigterm handler: {e}")))?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
        _ = shutdown.cancelled() => {
            // Shut down through the request surface
            return Ok(());
        }
    }

    shutdown.cancel();
    info!("Shutdown signal sent");
    Ok(())
}

pub fn init_observability(
    node_id: &str,
    log_dir: &Path,
) -> Result<WorkerGuard> {
    let dir = log_dir.join(node_id);
    fs::create_dir_all(&dir).map_err(|e| Error::Fatal(format!("cannot create log dir {}: {}", dir.display(), e)))?;
    let log_file = tracing_appender::rolling::never(&dir, "kv.log");

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
