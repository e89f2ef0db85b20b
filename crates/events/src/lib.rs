#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Event system for async communication in steward
//!
//! This crate provides the event types and channel aliases used for
//! communication between crates. All user-visible output goes through
//! events - no direct logging or printing is allowed outside the
//! top-level driver.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Type alias for event sender
pub type EventSender = tokio::sync::mpsc::UnboundedSender<Event>;

/// Type alias for event receiver
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<Event>;

/// Create a new event channel
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Core event enum for all async communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Download events
    DownloadStarted {
        url: String,
        size: Option<u64>,
    },
    DownloadProgress {
        url: String,
        bytes_downloaded: u64,
        total_bytes: u64,
    },
    DownloadResuming {
        url: String,
        offset: u64,
    },
    DownloadRestarted {
        url: String,
        reason: String,
    },
    DownloadCompleted {
        url: String,
        size: u64,
    },
    DownloadNotModified {
        url: String,
    },

    // Manifest resolution
    ManifestFetched {
        name: String,
    },
    ManifestProcessing {
        name: String,
        selector: String,
    },
    ManifestSkipped {
        name: String,
        reason: String,
    },
    ConditionEvaluated {
        predicate: String,
        result: bool,
    },
    ItemQueued {
        name: String,
        version: String,
        action: String,
    },
    ItemSkipped {
        name: String,
        reason: String,
    },
    ManifestCacheCleaned {
        removed: Vec<PathBuf>,
    },

    // Disk image and copy operations
    ImageMounting {
        path: PathBuf,
    },
    ImageMounted {
        path: PathBuf,
        mount_point: PathBuf,
    },
    ImageUnmounted {
        mount_point: PathBuf,
    },
    CopyStarted {
        source: PathBuf,
        destination: PathBuf,
        total_bytes: u64,
    },
    CopyProgress {
        destination: PathBuf,
        bytes_copied: u64,
        total_bytes: u64,
    },
    CopyCompleted {
        destination: PathBuf,
    },

    // Script execution
    ScriptStarting {
        path: PathBuf,
    },
    ScriptOutput {
        line: String,
    },
    ScriptCompleted {
        path: PathBuf,
        exit_code: i32,
    },

    // Launchd jobs
    JobLoaded {
        label: String,
    },
    JobStarted {
        label: String,
    },
    JobCompleted {
        label: String,
        exit_code: i32,
    },

    // Pending-update tracking
    PendingUpdatesRecorded {
        count: usize,
    },
    ForceInstallDeadline {
        name: String,
        status: String,
    },

    // General
    Warning {
        message: String,
    },
    Error {
        message: String,
    },
    DebugLog {
        message: String,
    },
}

impl Event {
    /// Create a warning event
    pub fn warning(message: impl Into<String>) -> Self {
        Self::Warning {
            message: message.into(),
        }
    }

    /// Create an error event
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Create a debug log event
    pub fn debug(message: impl Into<String>) -> Self {
        Self::DebugLog {
            message: message.into(),
        }
    }
}

/// Helper to send events with error handling
pub trait EventSenderExt {
    /// Send an event, ignoring send errors (receiver dropped)
    fn emit(&self, event: Event);
}

impl EventSenderExt for EventSender {
    fn emit(&self, event: Event) {
        // Ignore send errors - if receiver is dropped, we just continue
        let _ = self.send(event);
    }
}
