//! Remote fetch error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while listing remote references
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Repository not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: check the access token")]
    Unauthorized,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("More than {limit} {kind} in {repo}, raise remote.max-pages")]
    TooManyRefs { repo: String, kind: String, limit: usize },
}

impl FetchError {
    /// Map a non-success HTTP status into an error
    pub fn from_status(status: u16, repo: &str, body: String) -> Self {
        match status {
            401 | 403 => Self::Unauthorized,
            404 => Self::NotFound(repo.to_string()),
            _ => Self::ApiError { status, message: body },
        }
    }

    /// Check if this error is likely to clear up on its own
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::ApiError { status, .. } => *status >= 500 || *status == 429,
            FetchError::Network(_) => true,
            FetchError::Timeout(_) => true,
            FetchError::NotFound(_)
            | FetchError::Unauthorized
            | FetchError::InvalidResponse(_)
            | FetchError::UnsupportedProvider(_)
            | FetchError::TooManyRefs { .. } => false,
        }
    }
}
