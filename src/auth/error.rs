//! Token acquisition errors.

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("OAuth token error: HTTP {status}. Response: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("Failed to acquire access token: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to acquire access token: malformed token response: {0}")]
    Malformed(String),
}

impl AuthError {
    /// HTTP status of a rejected grant, if the endpoint answered at all.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            Self::Request(e) => e.status(),
            Self::Malformed(_) => None,
        }
    }
}
