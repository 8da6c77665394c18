//! Notification delivery errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Template error: {0}")]
    Template(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to encode payload: {0}")]
    Encode(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),
}
