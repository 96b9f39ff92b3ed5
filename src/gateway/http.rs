//! HTTP surface of the gateway.
//!
//! | Method | Path              | Action                               |
//! |--------|-------------------|--------------------------------------|
//! | GET    | `/<key>`          | local read                           |
//! | POST   | `/`               | insert every pair of the JSON object |
//! | PATCH  | `/<key>`          | update (upsert) `key`                |
//! | DELETE | `/<key>`          | delete `key`                         |
//! | POST   | `/join`           | add a voter                          |
//! | DELETE | `/remove/<id>`    | remove a member                      |
//! | POST   | `/snapshot`       | trigger a snapshot                   |
//! | DELETE | `/shutdown`       | stop the node                        |
//!
//! Keys and member ids in the path are percent-decoded, so `/caf%C3%A9`
//! addresses the key `café` and `/a%2Fb` the key `a/b`.
//!
//! The fixed routes are matched before the key routes. Only their own
//! method is taken: `GET /join` still reads the key `join`. The one key path
//! that cannot be reached is `DELETE /shutdown`, so a key named `shutdown`
//! can be written but not deleted over HTTP.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use tracing::warn;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

use super::Gateway;
use super::JoinRequest;
use crate::ClusterMember;
use crate::GatewayError;
use crate::LogId;
use crate::NetworkError;

#[derive(Debug, Serialize)]
struct ReadReply {
    key: String,
    value: String,
    found: bool,
}

#[derive(Debug, Serialize)]
struct CommitReply {
    index: u64,
    term: u64,
}

impl From<LogId> for CommitReply {
    fn from(log_id: LogId) -> Self {
        Self {
            index: log_id.index,
            term: log_id.term,
        }
    }
}

#[derive(Debug, Serialize)]
struct InsertReply {
    written: usize,
    index: u64,
    term: u64,
}

#[derive(Debug, Serialize)]
struct StatusReply {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct RemoveReply {
    id: String,
    removed: bool,
}

#[derive(Debug, Serialize)]
struct ErrorReply {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    leader: Option<ClusterMember>,
}

/// Status code a gateway error is reported with
pub fn status_for(error: &GatewayError) -> StatusCode {
    match error {
        GatewayError::Validation(_) | GatewayError::InvalidAddress(_) | GatewayError::Malformed(_) => {
            StatusCode::BAD_REQUEST
        }
        GatewayError::NotLeader { .. } | GatewayError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn json_reply<T: Serialize>(
    body: &T,
    status: StatusCode,
) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

fn error_reply(error: GatewayError) -> Response {
    let status = status_for(&error);
    let leader = match &error {
        GatewayError::NotLeader { leader } => leader.clone(),
        _ => None,
    };
    json_reply(
        &ErrorReply {
            error: error.outcome(),
            message: error.to_string(),
            leader,
        },
        status,
    )
}

/// Path segments arrive percent-encoded
fn decode_segment(segment: &str) -> Result<String, GatewayError> {
    urlencoding::decode(segment)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| GatewayError::Validation(format!("path segment {segment:?} is not UTF-8 once decoded: {e}")))
}

fn respond<T>(
    result: Result<T, GatewayError>,
    on_ok: impl FnOnce(T) -> Response,
) -> Result<Response, Rejection> {
    Ok(match result {
        Ok(value) => on_ok(value),
        Err(e) => error_reply(e),
    })
}

/// All gateway routes, with rejections rendered as JSON errors.
pub fn routes(gateway: Arc<Gateway>) -> impl Filter<Extract = (Response,), Error = Infallible> + Clone {
    let body_limit = gateway.config().max_body_bytes;
    let with_gateway = warp::any().map(move || gateway.clone());

    let shutdown = warp::path!("shutdown")
        .and(warp::delete())
        .and(with_gateway.clone())
        .and_then(handle_shutdown);

    let join = warp::path!("join")
        .and(warp::post())
        .and(warp::body::content_length_limit(body_limit))
        .and(warp::body::json())
        .and(with_gateway.clone())
        .and_then(handle_join);

    let snapshot = warp::path!("snapshot")
        .and(warp::post())
        .and(with_gateway.clone())
        .and_then(handle_snapshot);

    let remove = warp::path!("remove" / String)
        .and(warp::delete())
        .and(with_gateway.clone())
        .and_then(handle_remove);

    let insert = warp::path::end()
        .and(warp::post())
        .and(warp::body::content_length_limit(body_limit))
        .and(warp::body::json())
        .and(with_gateway.clone())
        .and_then(handle_insert);

    let read = warp::path!(String)
        .and(warp::get())
        .and(with_gateway.clone())
        .and_then(handle_read);

    let update = warp::path!(String)
        .and(warp::patch())
        .and(warp::body::content_length_limit(body_limit))
        .and(warp::body::json())
        .and(with_gateway.clone())
        .and_then(handle_update);

    let delete = warp::path!(String)
        .and(warp::delete())
        .and(with_gateway)
        .and_then(handle_delete);

    shutdown
        .or(join)
        .unify()
        .or(snapshot)
        .unify()
        .or(remove)
        .unify()
        .or(insert)
        .unify()
        .or(read)
        .unify()
        .or(update)
        .unify()
        .or(delete)
        .unify()
        .recover(handle_rejection)
        .unify()
}

/// Binds the HTTP server. The returned future resolves once the gateway's
/// shutdown token fires and in-flight requests have drained.
pub fn bind_server(
    gateway: Arc<Gateway>,
    address: SocketAddr,
) -> Result<(SocketAddr, impl Future<Output = ()> + Send + 'static), NetworkError> {
    let token = gateway.shutdown_token();
    let (bound, server) = warp::serve(routes(gateway))
        .try_bind_with_graceful_shutdown(address, async move { token.cancelled().await })
        .map_err(|e| NetworkError::BindFailed {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
    info!(%bound, "Gateway HTTP server listening");
    Ok((bound, server))
}

async fn handle_read(
    segment: String,
    gateway: Arc<Gateway>,
) -> Result<Response, Rejection> {
    let key = match decode_segment(&segment) {
        Ok(key) => key,
        Err(e) => return Ok(error_reply(e)),
    };
    let result = gateway.read(&key);
    respond(result, |value| {
        let found = value.is_some();
        json_reply(
            &ReadReply {
                key,
                value: value.unwrap_or_default(),
                found,
            },
            StatusCode::OK,
        )
    })
}

async fn handle_insert(
    pairs: BTreeMap<String, String>,
    gateway: Arc<Gateway>,
) -> Result<Response, Rejection> {
    let result = gateway.insert_all(pairs).await;
    respond(result, |committed| {
        let last = committed.last().copied().unwrap_or_default();
        json_reply(
            &InsertReply {
                written: committed.len(),
                index: last.index,
                term: last.term,
            },
            StatusCode::CREATED,
        )
    })
}

async fn handle_update(
    segment: String,
    body: BTreeMap<String, String>,
    gateway: Arc<Gateway>,
) -> Result<Response, Rejection> {
    let key = match decode_segment(&segment) {
        Ok(key) => key,
        Err(e) => return Ok(error_reply(e)),
    };
    // The body names the key again; it must agree with the path
    let value = match (body.len(), body.get(&key)) {
        (1, Some(value)) => value.clone(),
        _ => {
            return Ok(error_reply(GatewayError::Validation(format!(
                "body must be a single {{\"{key}\": value}} pair"
            ))))
        }
    };
    let result = gateway.update(key, value).await;
    respond(result, |log_id| json_reply(&CommitReply::from(log_id), StatusCode::OK))
}

async fn handle_delete(
    segment: String,
    gateway: Arc<Gateway>,
) -> Result<Response, Rejection> {
    let key = match decode_segment(&segment) {
        Ok(key) => key,
        Err(e) => return Ok(error_reply(e)),
    };
    let result = gateway.delete(key).await;
    respond(result, |log_id| json_reply(&CommitReply::from(log_id), StatusCode::OK))
}

async fn handle_join(
    request: JoinRequest,
    gateway: Arc<Gateway>,
) -> Result<Response, Rejection> {
    let result = gateway.join(request).await;
    respond(result, |()| json_reply(&StatusReply { status: "joined" }, StatusCode::OK))
}

async fn handle_remove(
    segment: String,
    gateway: Arc<Gateway>,
) -> Result<Response, Rejection> {
    let id = match decode_segment(&segment) {
        Ok(id) => id,
        Err(e) => return Ok(error_reply(e)),
    };
    let result = gateway.remove(&id).await;
    respond(result, |removed| json_reply(&RemoveReply { id, removed }, StatusCode::OK))
}

async fn handle_snapshot(gateway: Arc<Gateway>) -> Result<Response, Rejection> {
    let result = gateway.trigger_snapshot().await;
    respond(result, |log_id| json_reply(&CommitReply::from(log_id), StatusCode::ACCEPTED))
}

async fn handle_shutdown(gateway: Arc<Gateway>) -> Result<Response, Rejection> {
    let result = gateway.shutdown().await;
    respond(result, |()| json_reply(&StatusReply { status: "shutting_down" }, StatusCode::OK))
}

async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    if let Some(e) = rejection.find::<warp::body::BodyDeserializeError>() {
        return Ok(error_reply(GatewayError::Malformed(e.to_string())));
    }

    let (status, error, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "not_found", "no such route".to_string())
    } else if let Some(e) = rejection.find::<warp::reject::PayloadTooLarge>() {
        (StatusCode::PAYLOAD_TOO_LARGE, "too_large", e.to_string())
    } else if let Some(e) = rejection.find::<warp::reject::LengthRequired>() {
        (StatusCode::LENGTH_REQUIRED, "length_required", e.to_string())
    } else if let Some(e) = rejection.find::<warp::reject::UnsupportedMediaType>() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_media_type", e.to_string())
    } else if let Some(e) = rejection.find::<warp::reject::MethodNotAllowed>() {
        (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", e.to_string())
    } else {
        warn!(?rejection, "Unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "unhandled rejection".to_string(),
        )
    };

    Ok(json_reply(
        &ErrorReply {
            error,
            message,
            leader: None,
        },
        status,
    ))
}
