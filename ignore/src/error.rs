use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IgnoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid glob pattern '{pattern}' in {source_file}: {message}")]
    Pattern {
        pattern: String,
        source_file: PathBuf,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, IgnoreError>;
