//! Shared error-kind vocabulary (§7). `forge-providers::ClientError` wraps
//! these kinds with context (status code, body, attempt count); this crate
//! only owns the taxonomy so it can be shared by any layer without pulling
//! in HTTP or async dependencies.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Caller-initiated cancellation. Never retried, never wrapped.
    Cancelled,
    /// Transport-level timeout.
    Timeout,
    /// Connection refused/reset, DNS failure, TLS handshake failure,
    /// premature EOF.
    Network,
    /// Non-retryable (or exhausted) HTTP response.
    Http,
    RateLimited,
    /// Malformed provider response (bad SSE frame, missing required field).
    ProviderMalformed,
    /// Tool-call argument JSON failed to parse.
    ToolArgsParse,
    ConfigInvalid,
    /// 401/403, or an OAuth refresh that still failed after one retry.
    AuthInvalid,
    Internal,
}

impl ErrorKind {
    /// Whether this kind is retried under the retry policy (§4.2, §7).
    /// `RateLimited` and `Http` are conditionally retryable depending on
    /// status; this only reports the kinds that are unconditionally not.
    #[must_use]
    pub fn is_never_retried(self) -> bool {
        matches!(
            self,
            ErrorKind::Cancelled | ErrorKind::ConfigInvalid | ErrorKind::AuthInvalid
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::Http => "http",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ProviderMalformed => "provider_malformed",
            ErrorKind::ToolArgsParse => "tool_args_parse",
            ErrorKind::ConfigInvalid => "config_invalid",
            ErrorKind::AuthInvalid => "auth_invalid",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}
