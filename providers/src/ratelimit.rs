//! Token-bucket rate limiting (C3).
//!
//! No teacher equivalent exists (the teacher's clients send unthrottled);
//! this is grounded on the token-bucket shape common across the retrieval
//! pack's HTTP clients and on the acquire/return contract in §4.3.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::ClientError;

/// `acquire` blocks until `tokens` are available or `cancel` fires;
/// `return_tokens` credits tokens back on permanent failure or stream
/// abort. Implementations must never credit tokens back on success.
#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    async fn acquire(&self, cancel: &CancellationToken, tokens: u32) -> Result<(), ClientError>;
    fn return_tokens(&self, request_count: u32, tokens: u32);
}

/// Map `(history length, max output)` to an estimated token count. Real
/// tokenization is out of scope (§1 Non-goals); this is the same rough
/// `chars / divisor` estimate used for `count_tokens` (§4.5), scaled by
/// history length in place of a message-by-message character count when
/// only lengths are known to the caller.
#[must_use]
pub fn estimate_tokens(history_len: usize, max_output_tokens: u32) -> u32 {
    let history_estimate = (history_len as u32).saturating_mul(64);
    history_estimate.saturating_add(max_output_tokens)
}

struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}

/// A single-bucket token-bucket limiter shared by a provider client.
pub struct TokenBucket {
    bucket: Mutex<Bucket>,
    poll_interval: Duration,
}

impl TokenBucket {
    #[must_use]
    pub fn new(capacity: u32, refill_per_sec: u32) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                capacity: capacity as f64,
                tokens: capacity as f64,
                refill_per_sec: refill_per_sec as f64,
                last_refill: Instant::now(),
            }),
            poll_interval: Duration::from_millis(50),
        }
    }

    fn try_take(&self, tokens: u32) -> bool {
        let mut bucket = self.bucket.lock().expect("token bucket mutex poisoned");
        bucket.refill();
        if bucket.tokens >= tokens as f64 {
            bucket.tokens -= tokens as f64;
            true
        } else {
            false
        }
    }
}

#[async_trait::async_trait]
impl RateLimiter for TokenBucket {
    async fn acquire(&self, cancel: &CancellationToken, tokens: u32) -> Result<(), ClientError> {
        loop {
            if self.try_take(tokens) {
                return Ok(());
            }
            tokio::select! {
                () = cancel.cancelled() => return Err(ClientError::Cancelled),
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    fn return_tokens(&self, _request_count: u32, tokens: u32) {
        let mut bucket = self.bucket.lock().expect("token bucket mutex poisoned");
        bucket.tokens = (bucket.tokens + tokens as f64).min(bucket.capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_succeeds_within_capacity() {
        let bucket = TokenBucket::new(100, 10);
        let cancel = CancellationToken::new();
        assert!(bucket.acquire(&cancel, 50).await.is_ok());
    }

    #[tokio::test]
    async fn acquire_respects_cancellation() {
        let bucket = TokenBucket::new(1, 0);
        bucket.try_take(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = bucket.acquire(&cancel, 100).await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }

    #[test]
    fn return_tokens_never_exceeds_capacity() {
        let bucket = TokenBucket::new(10, 0);
        bucket.return_tokens(1, 1000);
        assert!(bucket.try_take(10));
        assert!(!bucket.try_take(1));
    }

    #[test]
    fn estimate_scales_with_history_and_output() {
        assert!(estimate_tokens(10, 1024) > estimate_tokens(1, 1024));
    }
}
