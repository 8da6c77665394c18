//! Persistence errors

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings file {path}: {source}")]
    Settings {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to encode {0}")]
    Encode(String),

    #[error("Failed to decode snapshot {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("Invalid user key: {0}")]
    InvalidKey(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(i64),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
