//! Core domain types for Forge.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies: the canonical provider-neutral message model (§3 in the
//! design doc), tool declarations, the streaming chunk contract, client
//! identity, retry configuration, and the shared error-kind taxonomy.
//! Everything here can be used from any layer of the application.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod chunk;
mod error;
mod provider;
mod retry;
mod strings;
mod tool;
mod turn;

pub use chunk::{FinishReason, StreamingChunk, validate_stream};
pub use error::ErrorKind;
pub use provider::{ClientIdentity, Provider};
pub use retry::{RetryConfig, RetryConfigError};
pub use strings::{EmptyStringError, NonEmptyString};
pub use tool::{ToolDefinition, ToolSchema};
pub use turn::{
    FunctionCall, FunctionResponse, JsonMap, Part, Role, Turn, ValidationError, sanitize,
    try_text_turn, validate,
};
