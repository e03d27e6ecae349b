//! Retry policy: error classification plus exponential backoff with jitter.
//!
//! Grounded on the teacher's Stainless-style retry module (status-code
//! classification, `Retry-After` header handling), but the jitter formula
//! is the spec's up-jitter rather than the teacher's down-jitter: delay is
//! `min(initial * 2^attempt, max) + U[0, delay/4)`, never less than the
//! unjittered backoff step.

use std::time::Duration;

use forge_types::RetryConfig;
use reqwest::StatusCode;

use crate::error::ClientError;

/// Attempt 0 is the first try and has no preceding delay; callers only call
/// [`backoff`] before attempt N for N >= 1, passing `attempt - 1`.
#[must_use]
pub fn backoff(attempt: u32, cfg: &RetryConfig) -> Duration {
    let base_secs = cfg.initial_delay.as_secs_f64() * 2f64.powi(attempt as i32);
    let capped = base_secs.min(cfg.max_delay.as_secs_f64());
    let jitter = rand::random::<f64>() * (capped / 4.0);
    Duration::from_secs_f64((capped + jitter).min(cfg.max_delay.as_secs_f64() * 1.25))
}

/// Whether an HTTP status code alone is retryable (§4.2).
#[must_use]
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

/// Whether a transport-level `reqwest::Error` is retryable: a context
/// timeout/cancellation originating from the transport, or a
/// network-classified failure (connection refused/reset, DNS, TLS
/// handshake, premature EOF). Caller-initiated cancellation is filtered out
/// upstream (see `stream.rs`) before this is ever consulted.
#[must_use]
pub fn is_retryable_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() || err.is_decode()
}

/// Whether a fully classified [`ClientError`] should be retried.
#[must_use]
pub fn is_retryable(err: &ClientError) -> bool {
    match err {
        ClientError::Timeout { .. } | ClientError::Network { .. } | ClientError::RateLimited { .. } => {
            true
        }
        ClientError::Http { status, .. } => is_retryable_status(
            StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        ),
        ClientError::Cancelled
        | ClientError::ProviderMalformed { .. }
        | ClientError::ToolArgsParse { .. }
        | ClientError::ConfigInvalid { .. }
        | ClientError::AuthInvalid { .. }
        | ClientError::Internal { .. } => false,
    }
}

/// Execute `attempt_fn` under the retry policy: non-2xx retryable statuses
/// and retryable transport errors are retried with backoff between
/// attempts, checking cancellation before and during each sleep. The first
/// success or the final attempt's error is returned; only the last error is
/// surfaced to the caller (§7).
pub async fn execute_with_retry<F, Fut>(
    cancel: &tokio_util::sync::CancellationToken,
    cfg: &RetryConfig,
    mut attempt_fn: F,
) -> Result<reqwest::Response, ClientError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut last_err: Option<ClientError> = None;

    for attempt in 0..=cfg.max_retries {
        if attempt > 0 {
            let delay = backoff(attempt - 1, cfg);
            tokio::select! {
                () = cancel.cancelled() => return Err(ClientError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        match attempt_fn().await {
            Ok(response) => {
                if response.status().is_success() {
                    return Ok(response);
                }
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let err = ClientError::http(status.as_u16(), &body);
                if !is_retryable_status(status) {
                    return Err(err);
                }
                last_err = Some(err);
            }
            Err(transport_err) => {
                let err = if transport_err.is_timeout() {
                    ClientError::Timeout { attempts: attempt + 1 }
                } else {
                    ClientError::Network {
                        attempts: attempt + 1,
                        message: transport_err.to_string(),
                    }
                };
                if !is_retryable_transport_error(&transport_err) {
                    return Err(err);
                }
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or(ClientError::Internal {
        message: "retry loop exhausted with no error recorded".to_string(),
    }))
}
