//! Network-related error types

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    #[error("connection failed for {url}: {detail}")]
    Connection { url: String, detail: String },

    #[error("connection timeout to {url}")]
    Timeout { url: String },

    #[error("HTTP error {status} for {url}")]
    Http { status: u16, url: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("TLS/security error: {0}")]
    Security(String),

    #[error("I/O error during transfer: {0}")]
    Io(String),

    #[error("server changed identifiers during resume: {detail}")]
    ResumeMismatch { detail: String },
}

impl NetworkError {
    /// True for the statuses the resolver treats as "manifest not retrieved".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Http { status: 404, .. })
    }
}
