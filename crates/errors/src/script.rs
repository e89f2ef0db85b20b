//! Script execution error types

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    /// The executor downgrades this to a warning and skips the item.
    #[error("insecure permissions on {path}: {detail}")]
    InsecurePermissions { path: String, detail: String },

    #[error("script {path} timed out after {seconds}s")]
    Timeout { path: String, seconds: u64 },

    #[error("could not launch {path}: {detail}")]
    LaunchFailed { path: String, detail: String },

    #[error("pkginfo has no script named {field}")]
    MissingScript { field: String },
}
