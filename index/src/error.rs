//! Error taxonomy for the indexer, mirroring `forge_providers::ClientError`'s
//! shape (thiserror enum, no stringly-typed errors).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("cancelled")]
    Cancelled,
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to (de)serialize index state: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("failed to (de)serialize embedding cache: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("embedder returned {got} vectors for {expected} inputs")]
    EmbedderMismatch { expected: usize, got: usize },
    #[error("embedder failed: {message}")]
    Embedder { message: String },
}

pub type Result<T> = std::result::Result<T, IndexError>;
