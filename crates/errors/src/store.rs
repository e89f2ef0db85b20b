//! Property-list store error types

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("document not found: {path}")]
    NotFound { path: String },

    #[error("malformed property list at {path}: {detail}")]
    Malformed { path: String, detail: String },

    #[error("I/O error for {path}: {detail}")]
    Io { path: String, detail: String },
}
