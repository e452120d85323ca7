use crate::error::ServiceError;
use std::time::Duration;
use tracing::warn;

pub const MAX_ATTEMPTS: usize = 3;
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// One retry policy for every outbound HTTP verb, panel and ledger
/// alike: up to [`MAX_ATTEMPTS`] tries with a fixed delay on network
/// errors, timeouts and 5xx responses. Anything else is returned to
/// the caller as-is. Exhaustion surfaces as `RemoteUnavailable`.
pub async fn send_with_retry<F, Fut>(op: &str, send: F) -> Result<reqwest::Response, ServiceError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut last_failure = String::new();

    for attempt in 1..=MAX_ATTEMPTS {
        match send().await {
            Ok(resp) if resp.status().is_server_error() => {
                last_failure = format!("{op}: server returned {}", resp.status());
                warn!("{} (attempt {}/{})", last_failure, attempt, MAX_ATTEMPTS);
            }
            Ok(resp) => return Ok(resp),
            Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                last_failure = format!("{op}: {e}");
                warn!("{} (attempt {}/{})", last_failure, attempt, MAX_ATTEMPTS);
            }
            Err(e) => return Err(ServiceError::RemoteUnavailable(format!("{op}: {e}"))),
        }

        if attempt < MAX_ATTEMPTS {
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }

    Err(ServiceError::RemoteUnavailable(format!(
        "{last_failure} (after {MAX_ATTEMPTS} attempts)"
    )))
}
