//! The shared operation set every provider variant implements (§4.5, §9).
//!
//! The teacher's Go source used interface satisfaction plus runtime type
//! assertions for optional capabilities (`SetRateLimiter(any)`,
//! `GetRawClient() any`). Per §9 Design Notes this is re-architected as a
//! tagged variant of the four provider kinds behind one trait — no
//! reflection required.

use forge_types::{ClientIdentity, Part, ToolDefinition, Turn};
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::ratelimit::RateLimiter;
use crate::stream::ChunkStream;
use std::sync::Arc;

/// Optional capability: providers that can report intermediate status
/// (stream idle warnings, OAuth refresh notices) call back through this
/// instead of a special chunk kind, keeping `StreamingChunk` itself free of
/// provider-specific variants.
pub trait StatusCallback: Send + Sync {
    fn on_status(&self, message: &str);
}

#[async_trait::async_trait]
pub trait ProviderClient: Send + Sync {
    async fn send(&self, cancel: &CancellationToken, message: Turn) -> Result<ChunkStream, ClientError> {
        self.send_with_history(cancel, &[], message).await
    }

    async fn send_with_history(
        &self,
        cancel: &CancellationToken,
        history: &[Turn],
        new_message: Turn,
    ) -> Result<ChunkStream, ClientError>;

    async fn send_tool_responses(
        &self,
        cancel: &CancellationToken,
        history: &[Turn],
        responses: Vec<Part>,
    ) -> Result<ChunkStream, ClientError>;

    fn set_tools(&self, tools: Vec<ToolDefinition>);

    fn set_system_instruction(&self, instruction: Option<String>);

    fn set_rate_limiter(&self, limiter: Arc<dyn RateLimiter>);

    /// Character-based estimate unless the provider has a real endpoint
    /// (none of the four do today — see §9 Open Questions on Gemini-OAuth
    /// `CountTokens`).
    fn count_tokens(&self, history: &[Turn]) -> u32;

    fn get_model(&self) -> &str;

    fn with_model(self: Arc<Self>, new_model: String) -> Arc<dyn ProviderClient>;

    fn identity(&self) -> ClientIdentity;

    async fn close(&self);
}

/// Estimate `total_chars / divisor`, `divisor` 4.0 by default, 3.5 for model
/// ids starting with `glm` (§4.5 token-counting fallback).
#[must_use]
pub fn estimate_token_count(history: &[Turn], model: &str) -> u32 {
    let divisor = if model.to_ascii_lowercase().starts_with("glm") {
        3.5
    } else {
        4.0
    };
    let total_chars: usize = history
        .iter()
        .flat_map(|t| t.parts.iter())
        .map(part_char_len)
        .sum();
    ((total_chars as f64) / divisor).ceil() as u32
}

fn part_char_len(part: &Part) -> usize {
    match part {
        Part::Text(t) => t.chars().count(),
        Part::FunctionCall(c) => c.name.len() + c.args.0.to_string().len(),
        Part::FunctionResponse(r) => r.name.len() + r.response.0.to_string().len(),
        Part::InlineBinaryData { data, .. } => data.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_types::Role;

    #[test]
    fn glm_models_use_smaller_divisor() {
        let history = vec![Turn::user_text("a".repeat(100))];
        let glm = estimate_token_count(&history, "glm-4.6");
        let other = estimate_token_count(&history, "gemini-3-pro");
        assert!(glm > other);
    }

    #[test]
    fn empty_history_estimates_zero() {
        assert_eq!(estimate_token_count(&[], "gemini-3-pro"), 0);
        let _ = Role::User;
    }
}
