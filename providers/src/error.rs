//! The boundary error type every provider client surfaces.

use forge_types::ErrorKind;

/// Maximum bytes of an HTTP error body retained before truncation.
pub const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;
/// Maximum bytes of an SSE event buffer retained before the stream is
/// treated as malformed and aborted.
pub const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cancelled")]
    Cancelled,

    #[error("timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    #[error("network error after {attempts} attempt(s): {message}")]
    Network { attempts: u32, message: String },

    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    #[error("rate limited after {attempts} attempt(s)")]
    RateLimited { attempts: u32 },

    #[error("malformed provider response: {message}")]
    ProviderMalformed { message: String },

    #[error("failed to parse tool call arguments: {message}")]
    ToolArgsParse { message: String },

    #[error("invalid configuration: {message}")]
    ConfigInvalid { message: String },

    #[error("authentication invalid: {message}")]
    AuthInvalid { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ClientError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Cancelled => ErrorKind::Cancelled,
            ClientError::Timeout { .. } => ErrorKind::Timeout,
            ClientError::Network { .. } => ErrorKind::Network,
            ClientError::Http { .. } => ErrorKind::Http,
            ClientError::RateLimited { .. } => ErrorKind::RateLimited,
            ClientError::ProviderMalformed { .. } => ErrorKind::ProviderMalformed,
            ClientError::ToolArgsParse { .. } => ErrorKind::ToolArgsParse,
            ClientError::ConfigInvalid { .. } => ErrorKind::ConfigInvalid,
            ClientError::AuthInvalid { .. } => ErrorKind::AuthInvalid,
            ClientError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Truncate `body` to [`MAX_ERROR_BODY_BYTES`] on a char boundary.
    #[must_use]
    pub fn http(status: u16, body: &str) -> Self {
        ClientError::Http {
            status,
            body: cap_str(body, MAX_ERROR_BODY_BYTES),
        }
    }

    /// A human-readable message suitable for a terminal error chunk. Secrets
    /// are redacted before the message ever reaches this formatting step
    /// (see `forge_utils::redact_secrets` at the call site that logs raw
    /// bodies), so this only shapes the text, it does not scrub it again.
    #[must_use]
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

#[must_use]
pub fn cap_str(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… [truncated]", &s[..end])
}

pub type Result<T> = std::result::Result<T, ClientError>;
