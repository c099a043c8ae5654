use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("request timed out")]
    Timeout,
    #[error("max retries ({attempts}) exceeded for {label}")]
    RetriesExhausted { label: String, attempts: u32 },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RequestError::Timeout
        } else if err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            RequestError::RateLimited { retry_after: None }
        } else {
            RequestError::Other(err.into())
        }
    }
}

/// Longest wait honoured from a `Retry-After` header.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

/// Reads a `Retry-After` header expressed in (possibly fractional) seconds,
/// capped at [`MAX_RETRY_AFTER`].
pub fn retry_after_from_headers(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| Duration::from_secs_f64(secs.min(MAX_RETRY_AFTER.as_secs_f64())))
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Runs `request` until it succeeds, retrying only when it reports rate
/// limiting. Any other error is returned straight away.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut request: F,
) -> Result<T, RequestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    for attempt in 0..policy.max_attempts {
        match request().await {
            Ok(value) => return Ok(value),
            Err(RequestError::RateLimited { .. }) if attempt + 1 == policy.max_attempts => break,
            Err(RequestError::RateLimited { retry_after }) => {
                let wait = retry_after.unwrap_or_else(|| policy.backoff(attempt));
                tracing::warn!(
                    "Rate limited on {} (attempt {}/{}). Retrying in {:?}",
                    label,
                    attempt + 1,
                    policy.max_attempts,
                    wait
                );
                sleep(wait).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(RequestError::RetriesExhausted {
        label: label.to_string(),
        attempts: policy.max_attempts,
    })
}
