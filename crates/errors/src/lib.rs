#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Error types for the steward managed-software client
//!
//! This crate provides fine-grained error types organized by domain,
//! plus a single cross-crate `Error` enum used at API boundaries.

use thiserror::Error;

pub mod install;
pub mod manifest;
pub mod network;
pub mod script;
pub mod store;

// Re-export all error types at the root
pub use install::InstallError;
pub use manifest::ManifestError;
pub use network::NetworkError;
pub use script::ScriptError;
pub use store::StoreError;

/// Generic error type for cross-crate boundaries
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("install error: {0}")]
    Install(#[from] InstallError),

    #[error("script error: {0}")]
    Script(#[from] ScriptError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
        path: Option<std::path::PathBuf>,
    },
}

impl Error {
    /// Create an internal error with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an Io error with an associated path
    pub fn io_with_path(err: &std::io::Error, path: impl Into<std::path::PathBuf>) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: Some(path.into()),
        }
    }

    /// True when the error means "the server does not have this resource",
    /// as opposed to a transport or protocol failure.
    #[must_use]
    pub fn is_not_retrieved(&self) -> bool {
        match self {
            Self::Network(e) => e.is_not_found(),
            Self::Manifest(ManifestError::NotRetrieved { .. }) => true,
            Self::Store(StoreError::NotFound { .. }) => true,
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: None,
        }
    }
}

/// Result type alias for steward operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_retrieved_classification() {
        let err: Error = NetworkError::Http {
            status: 404,
            url: "https://repo/manifests/mac01".into(),
        }
        .into();
        assert!(err.is_not_retrieved());

        let err: Error = NetworkError::Http {
            status: 500,
            url: "https://repo/manifests/mac01".into(),
        }
        .into();
        assert!(!err.is_not_retrieved());

        let err: Error = ManifestError::NotRetrieved {
            name: "mac01".into(),
            detail: "404".into(),
        }
        .into();
        assert!(err.is_not_retrieved());
    }

    #[test]
    fn io_error_carries_path() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = Error::io_with_path(&io, "/tmp/x");
        match err {
            Error::Io { kind, path, .. } => {
                assert_eq!(kind, std::io::ErrorKind::PermissionDenied);
                assert_eq!(path.as_deref(), Some(std::path::Path::new("/tmp/x")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
