//! Install executor error types

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum InstallError {
    #[error("failed to mount {path}: {detail}")]
    MountFailed { path: String, detail: String },

    #[error("failed to unmount {mount_point}: {detail}")]
    UnmountFailed { mount_point: String, detail: String },

    #[error("no source_item in disk image: {path}")]
    MissingSourceItem { path: String },

    #[error("item has no usable destination: {detail}")]
    InvalidDestination { detail: String },

    #[error("copy failed for {path}: {detail}")]
    CopyFailed { path: String, detail: String },

    #[error("could not set ownership/mode on {path}: {detail}")]
    OwnershipFailed { path: String, detail: String },

    #[error("launchd job {label} failed: {detail}")]
    JobFailed { label: String, detail: String },
}
