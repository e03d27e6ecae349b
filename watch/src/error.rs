use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error("failed to construct watcher: {0}")]
    Init(#[source] notify::Error),
}

pub type Result<T> = std::result::Result<T, WatchError>;
