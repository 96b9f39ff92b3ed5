use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::utils::net::address_str;
use crate::utils::net::validate_address;
use crate::BackoffPolicy;
use crate::Error;
use crate::GatewayError;
use crate::JoinRequest;
use crate::NetworkError;
use crate::Result;

/// Outcome of a single join attempt
enum Attempt {
    Done,
    Retry(Error),
    Fail(Error),
}

/// Asks the member serving `join_address` to admit this node as a voter.
///
/// Transport failures, timeouts and `503` answers (the contacted member is
/// not the leader, or is shutting down) are retried with exponential
/// backoff. Any other non-success status is final. Cancelling `shutdown`
/// abandons the attempt.
pub async fn join_cluster(
    join_address: &str,
    request: &JoinRequest,
    policy: BackoffPolicy,
    shutdown: CancellationToken,
) -> Result<()> {
    validate_address(join_address)
        .map_err(|reason| GatewayError::InvalidAddress(format!("{join_address:?}: {reason}")))?;

    let client = reqwest::Client::builder()
        .timeout(policy.timeout())
        .build()
        .map_err(NetworkError::from)?;
    let url = format!("{}/join", address_str(join_address));

    let attempts = policy.max_retries + 1;
    for attempt in 0..attempts {
        let last_error = match try_join(&client, &url, join_address, request).await {
            Attempt::Done => return Ok(()),
            Attempt::Fail(e) => return Err(e),
            Attempt::Retry(e) => e,
        };

        if attempt + 1 == attempts {
            warn!(%last_error, "Join attempt failed, retries exhausted");
            break;
        }

        let delay: Duration = policy.delay(attempt);
        warn!(attempt, ?delay, %last_error, "Join attempt failed, retrying");
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Join abandoned on shutdown");
                return Err(GatewayError::ShuttingDown.into());
            }
            _ = sleep(delay) => {}
        }
    }

    Err(NetworkError::RetryExhausted(attempts).into())
}

async fn try_join(
    client: &reqwest::Client,
    url: &str,
    join_address: &str,
    request: &JoinRequest,
) -> Attempt {
    let response = match client.post(url).json(request).send().await {
        Ok(response) => response,
        Err(e) => return Attempt::Retry(NetworkError::from(e).into()),
    };

    let status = response.status();
    if status.is_success() {
        debug!(%status, "Join accepted");
        return Attempt::Done;
    }

    let body = response.text().await.unwrap_or_default();
    let rejected: Error = NetworkError::JoinRejected {
        address: join_address.to_string(),
        status: status.as_u16(),
        body,
    }
    .into();

    if status == reqwest::StatusCode::SERVICE_UNAVAILABLE || status.is_server_error() {
        Attempt::Retry(rejected)
    } else {
        Attempt::Fail(rejected)
    }
}
