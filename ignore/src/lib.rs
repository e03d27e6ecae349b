//! Gitignore-compatible pattern matching: pattern parsing, last-match-wins
//! evaluation, and an LRU-cached matcher over a project tree.

pub mod error;
pub mod matcher;
pub mod pattern;

pub use error::{IgnoreError, Result};
pub use matcher::GitignoreMatcher;
pub use pattern::Pattern;
