//! Multi-provider streaming LLM client layer.
//!
//! Four wire-format clients (Gemini API-key, Gemini OAuth/Code Assist,
//! Anthropic-compatible, Ollama) share one [`client::ProviderClient`]
//! surface, a retry policy, a token-bucket rate limiter, a bounded
//! cancellable streaming channel, a client pool keyed by `(provider, model)`,
//! and a sticky-failover wrapper for running several clients as one.

mod anthropic;
mod client;
mod error;
mod failover;
mod gemini_api;
mod gemini_oauth;
mod jsonscan;
mod ollama;
mod pool;
mod ratelimit;
mod retry;
mod sse;
mod stream;

pub use anthropic::AnthropicClient;
pub use client::{ProviderClient, StatusCallback, estimate_token_count};
pub use error::{ClientError, Result};
pub use failover::FailoverClient;
pub use gemini_api::GeminiApiClient;
pub use gemini_oauth::{AccessToken, GeminiOAuthClient, TokenStore};
pub use ollama::OllamaClient;
pub use pool::ClientPool;
pub use ratelimit::{RateLimiter, TokenBucket, estimate_tokens};
pub use retry::{backoff, execute_with_retry, is_retryable, is_retryable_status};
pub use stream::{CHUNK_CHANNEL_CAPACITY, ChunkSender, ChunkStream, channel};

/// Shared HTTP client builder used by every provider's constructor: a
/// connect timeout and HTTPS enforcement, mirroring the teacher's single
/// shared-client policy (no per-request client construction).
#[must_use]
pub fn build_http_client(request_timeout: std::time::Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(30))
        .timeout(request_timeout)
        .https_only(true)
        .build()
        .expect("build shared HTTP client")
}
