//! The streaming chunk contract: what every provider client emits on its
//! chunk channel (`forge-providers::stream`), regardless of wire format.

use serde::{Deserialize, Serialize};

use crate::turn::{FunctionCall, Part};

/// Why a stream finished. `ToolUse` is folded into `Stop` per the
/// translation table in the spec (a tool-use stop still carries pending
/// tool calls on the terminal chunk, it does not get its own reason).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    Stop,
    MaxTokens,
}

/// One chunk of a streaming response.
///
/// Invariants (enforced by producers, checked in tests via
/// [`validate_stream`]): at most one chunk has `done == true`, and it is
/// the last chunk delivered; an `error` chunk always has `done == true`;
/// `function_calls` is populated only on the chunk where a tool-use block
/// completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamingChunk {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    /// Extended-reasoning tokens, delivered on a separate channel from `text`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thinking: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_calls: Vec<FunctionCall>,
    /// Original parts, retained for signature-preserving re-send (Gemini's
    /// `thoughtSignature` and similar provider-specific round-trip state).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub original_parts: Vec<Part>,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
    #[serde(default)]
    pub input_tokens: Option<u32>,
    #[serde(default)]
    pub output_tokens: Option<u32>,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamingChunk {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn thinking(thinking: impl Into<String>) -> Self {
        Self {
            thinking: thinking.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn terminal(finish_reason: FinishReason, function_calls: Vec<FunctionCall>) -> Self {
        Self {
            function_calls,
            finish_reason: Some(finish_reason),
            done: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            done: true,
            ..Self::default()
        }
    }
}

/// Check the two stream-level invariants across a complete, ordered chunk
/// sequence: exactly one `done == true`, and it is the last element.
#[must_use]
pub fn validate_stream(chunks: &[StreamingChunk]) -> bool {
    let done_positions: Vec<usize> = chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| c.done)
        .map(|(i, _)| i)
        .collect();

    match done_positions.as_slice() {
        [] => false,
        [only] => *only == chunks.len() - 1,
        _ => false,
    }
}
