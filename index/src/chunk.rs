//! The addressable unit the indexer embeds and searches over.

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};

/// A contiguous, 1-based inclusive line range of a file plus its content.
///
/// Invariant: `line_start <= line_end`; `content` is the joined source
/// lines of that range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub content: String,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    /// Construct a chunk, rejecting an inverted or whitespace-only range at
    /// the call site rather than here — callers (the chunker) already drop
    /// whitespace-only chunks per spec, so this stays a plain constructor.
    #[must_use]
    pub fn new(file_path: impl Into<String>, line_start: u32, line_end: u32, content: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            line_start,
            line_end,
            content: content.into(),
            embedding: None,
        }
    }

    #[must_use]
    pub fn is_whitespace_only(&self) -> bool {
        self.content.trim().is_empty()
    }

    /// Cache key: `"<file-path>:<line-start>"`.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.file_path, self.line_start)
    }

    #[must_use]
    pub fn content_hash(&self) -> ContentHash {
        content_hash(self.content.as_bytes())
    }
}

/// First 8 bytes of SHA-256 of some content, hex-encoded — used both for
/// chunk content hashes and `FileState` content hashes.
pub type ContentHash = String;

#[must_use]
pub fn content_hash(bytes: &[u8]) -> ContentHash {
    let digest = Sha256::digest(bytes);
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_joins_path_and_line_start() {
        let chunk = Chunk::new("src/main.rs", 10, 20, "fn main() {}");
        assert_eq!(chunk.cache_key(), "src/main.rs:10");
    }

    #[test]
    fn whitespace_only_content_is_detected() {
        let chunk = Chunk::new("a.rs", 1, 3, "   \n\t\n  ");
        assert!(chunk.is_whitespace_only());
    }

    #[test]
    fn content_hash_is_16_hex_chars() {
        let hash = content_hash(b"fn main() {}");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn content_hash_is_deterministic() {
        assert_eq!(content_hash(b"same"), content_hash(b"same"));
        assert_ne!(content_hash(b"same"), content_hash(b"different"));
    }
}
