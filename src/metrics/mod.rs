use std::net::SocketAddr;
use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

use crate::NetworkError;

#[cfg(test)]
mod metrics_test;

lazy_static! {
    pub static ref APPLIED_ENTRIES: IntCounter =
        IntCounter::new("kv_applied_entries", "Log entries applied to the key-value store")
            .expect("metric can not be created");

    pub static ref APPLY_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("kv_apply_failures", "Log entries rejected by the key-value store"),
        &["reason"]
    )
    .expect("metric can not be created");

    pub static ref GATEWAY_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("kv_gateway_requests", "Gateway requests by operation and outcome"),
        &["op", "outcome"]
    )
    .expect("metric can not be created");

    pub static ref WRITE_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new("kv_write_latency_ms", "Histogram of write commit latency in ms")
            .buckets(exponential_buckets(1.0, 2.0, 14).expect("valid buckets")),
        &["op"]
    )
    .expect("metric can not be created");

    pub static ref SNAPSHOTS_TAKEN: IntCounter =
        IntCounter::new("kv_snapshots_taken", "Snapshots persisted by the engine")
            .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

/// Registers the collectors with [`REGISTRY`]. Safe to call repeatedly.
pub fn register_custom_metrics() {
    REGISTER.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(APPLIED_ENTRIES.clone()),
            Box::new(APPLY_FAILURES.clone()),
            Box::new(GATEWAY_REQUESTS.clone()),
            Box::new(WRITE_LATENCY.clone()),
            Box::new(SNAPSHOTS_TAKEN.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                error!(%e, "collector can not be registered");
            }
        }
    });
}

/// Serves `GET /metrics` until `shutdown` is cancelled.
pub async fn start_server(
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), NetworkError> {
    register_custom_metrics();

    let metrics_route = warp::path!("metrics").and(warp::get()).and_then(metrics_handler);

    let address = SocketAddr::from(([0, 0, 0, 0], port));
    let (bound, server) = warp::serve(metrics_route)
        .try_bind_with_graceful_shutdown(address, async move { shutdown.cancelled().await })
        .map_err(|e| NetworkError::BindFailed {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
    info!(%bound, "Prometheus metrics endpoint listening");
    server.await;
    Ok(())
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(gather_text())
}

/// Text exposition of the custom registry followed by the default one
pub fn gather_text() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    }
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!("could not encode prometheus metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("metrics could not be from_utf8'd: {}", e);
        String::default()
    })
}
