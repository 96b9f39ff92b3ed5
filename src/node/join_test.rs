use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use warp::http::StatusCode;
use warp::Filter;

use super::join_cluster;
use crate::BackoffPolicy;
use crate::Error;
use crate::GatewayError;
use crate::JoinRequest;
use crate::NetworkError;

fn request() -> JoinRequest {
    JoinRequest {
        id: "n2".to_string(),
        address: "127.0.0.1:9082".to_string(),
    }
}

fn policy(max_retries: usize) -> BackoffPolicy {
    BackoffPolicy {
        max_retries,
        timeout_ms: 1000,
        base_delay_ms: 10,
        max_delay_ms: 50,
    }
}

/// Serves `/join`, answering with `statuses` in turn (the last one repeats)
fn spawn_join_server(statuses: Vec<StatusCode>) -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let route = warp::path!("join")
        .and(warp::post())
        .and(warp::body::json::<JoinRequest>())
        .map(move |body: JoinRequest| {
            assert_eq!(body, request());
            let hit = counter.fetch_add(1, Ordering::SeqCst);
            let status = statuses[hit.min(statuses.len() - 1)];
            warp::reply::with_status("", status)
        });
    let (address, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    (address, hits)
}

#[tokio::test]
async fn invalid_join_address_fails_without_contacting_anyone() {
    let result = join_cluster("not-an-address", &request(), policy(3), CancellationToken::new()).await;

    assert!(matches!(
        result,
        Err(Error::Gateway(GatewayError::InvalidAddress(_)))
    ));
}

#[tokio::test]
async fn unavailable_member_is_retried_until_admitted() {
    let (address, hits) = spawn_join_server(vec![
        StatusCode::SERVICE_UNAVAILABLE,
        StatusCode::SERVICE_UNAVAILABLE,
        StatusCode::OK,
    ]);

    join_cluster(&address.to_string(), &request(), policy(5), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let (address, hits) = spawn_join_server(vec![StatusCode::BAD_REQUEST]);

    let result = join_cluster(&address.to_string(), &request(), policy(5), CancellationToken::new()).await;

    assert!(matches!(
        result,
        Err(Error::System(crate::SystemError::Network(NetworkError::JoinRejected { status: 400, .. })))
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retries_are_bounded() {
    let (address, hits) = spawn_join_server(vec![StatusCode::SERVICE_UNAVAILABLE]);

    let result = join_cluster(&address.to_string(), &request(), policy(2), CancellationToken::new()).await;

    assert!(matches!(
        result,
        Err(Error::System(crate::SystemError::Network(NetworkError::RetryExhausted(3))))
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn cancellation_abandons_join() {
    let (address, _) = spawn_join_server(vec![StatusCode::SERVICE_UNAVAILABLE]);
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let slow = BackoffPolicy {
        base_delay_ms: 10_000,
        max_delay_ms: 10_000,
        ..policy(5)
    };
    let result = join_cluster(&address.to_string(), &request(), slow, shutdown).await;

    assert!(matches!(
        result,
        Err(Error::Gateway(GatewayError::ShuttingDown))
    ));
}
