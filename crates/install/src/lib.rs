#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Install executor
//!
//! Consumes the install-info accumulator and performs side effects:
//! mounting disk images, copying items to their destinations with
//! progress, running pre/post and embedded scripts under permission
//! checks, and supervising launchd-managed child jobs.

mod copy;
mod dmg;
mod installer;
mod launchd;
mod scripts;

pub use copy::{clear_quarantine_recursive, copy_items, ensure_directory};
pub use dmg::DiskImage;
pub use installer::{InstallSummary, Installer};
pub use launchd::{JobState, JobSupervisor, Launchctl, LaunchdJob};
pub use scripts::{check_script_permissions, run_embedded_script, run_script, ScriptPolicy};

/// Effective user id of this process.
#[must_use]
pub(crate) fn effective_uid() -> u32 {
    #[allow(unsafe_code)]
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe {
        libc::geteuid()
    }
}

/// Effective group id of this process. Tests use it to build script
/// policies that accept files they just created.
#[cfg(test)]
pub(crate) fn effective_gid() -> u32 {
    #[allow(unsafe_code)]
    // SAFETY: getegid has no preconditions and cannot fail.
    unsafe {
        libc::getegid()
    }
}
