#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Run-scoped registries
//!
//! Process-wide state for one agent run: the active-manifest table,
//! the run report, temp-directory lifecycle, display options, and the
//! cooperative stop flag. These are plain values owned by a
//! [`RunContext`] threaded through the pipeline; there are no global
//! statics.

mod manifests;
mod report;
mod tempdirs;

pub use manifests::ActiveManifests;
pub use report::Report;
pub use tempdirs::TempDirs;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide flags controlling verbosity and progress routing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisplayOptions {
    /// 0 = quiet, 1 = normal, 2+ = debug detail.
    pub verbosity: u8,
    /// Route progress to the GUI status channel instead of the console.
    pub gui_status: bool,
}

/// Cooperative cancellation flag shared across the pipeline.
///
/// Consulted at resolver recursion boundaries and between executor
/// items; an observed stop returns early without error.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Shared state for one run, threaded through the pipeline.
#[derive(Debug, Default)]
pub struct RunContext {
    pub manifests: ActiveManifests,
    pub report: Report,
    pub tempdirs: TempDirs,
    pub display: DisplayOptions,
    pub stop: StopFlag,
}

impl RunContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
