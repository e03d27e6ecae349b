//! The injected embedding capability. Per spec, no embedding model is
//! implemented in this crate — callers supply one (a provider API, a local
//! model runner, whatever fits) behind this trait.

use crate::error::IndexError;

#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in order.
    /// Implementations should return an error rather than a mismatched
    /// length; callers treat a length mismatch as [`IndexError::EmbedderMismatch`].
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError>;
}
