#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for the steward managed-software client
//!
//! This crate provides fundamental types used throughout the system:
//! the install-info accumulator, typed views over schemaless pkginfo
//! dictionaries, resource addressing, and the ordered action enums.

pub mod installinfo;
pub mod pkginfo;
pub mod resource;
pub mod version;

pub use installinfo::InstallInfo;
pub use pkginfo::PkgInfo;
pub use resource::ResourceKind;
pub use version::compare_versions;

use serde::{Deserialize, Serialize};

/// Restart behavior requested by a package record.
///
/// Variants are declared in escalation order so the strictest action
/// across a set of items is simply the maximum.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum RestartAction {
    #[default]
    None,
    RecommendRestart,
    RequireLogout,
    RequireRestart,
}

impl RestartAction {
    /// Parse the pkginfo `RestartAction` string. Unknown values map to `None`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "RecommendRestart" => Self::RecommendRestart,
            "RequireLogout" => Self::RequireLogout,
            "RequireRestart" => Self::RequireRestart,
            _ => Self::None,
        }
    }

    /// The post-install action this restart requirement implies.
    #[must_use]
    pub fn post_action(self) -> PostAction {
        match self {
            Self::None => PostAction::None,
            Self::RequireLogout => PostAction::Logout,
            Self::RecommendRestart | Self::RequireRestart => PostAction::Restart,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::RecommendRestart => "RecommendRestart",
            Self::RequireLogout => "RequireLogout",
            Self::RequireRestart => "RequireRestart",
        }
    }
}

/// Action a caller must take after an install pass.
///
/// Callers compose the maximum across the Munki and Apple passes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum PostAction {
    #[default]
    None,
    Logout,
    Restart,
    Shutdown,
}

/// Result of scanning pending items for passed force-install deadlines.
///
/// Totally ordered; scans return the maximum across all items.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ForceInstallStatus {
    #[default]
    None,
    Soon,
    Now,
    Logout,
    Restart,
}

impl ForceInstallStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Soon => "soon",
            Self::Now => "now",
            Self::Logout => "logout",
            Self::Restart => "restart",
        }
    }
}

impl std::fmt::Display for ForceInstallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_action_escalation_order() {
        assert!(RestartAction::None < RestartAction::RecommendRestart);
        assert!(RestartAction::RecommendRestart < RestartAction::RequireLogout);
        assert!(RestartAction::RequireLogout < RestartAction::RequireRestart);
    }

    #[test]
    fn restart_action_maps_to_post_action() {
        assert_eq!(RestartAction::None.post_action(), PostAction::None);
        assert_eq!(RestartAction::RequireLogout.post_action(), PostAction::Logout);
        assert_eq!(
            RestartAction::RecommendRestart.post_action(),
            PostAction::Restart
        );
        assert_eq!(
            RestartAction::RequireRestart.post_action(),
            PostAction::Restart
        );
    }

    #[test]
    fn force_install_status_is_totally_ordered() {
        use ForceInstallStatus::{Logout, None, Now, Restart, Soon};
        let mut statuses = vec![Restart, Soon, None, Logout, Now];
        statuses.sort();
        assert_eq!(statuses, vec![None, Soon, Now, Logout, Restart]);
    }

    #[test]
    fn post_action_max_composition() {
        let munki = PostAction::Logout;
        let apple = PostAction::Restart;
        assert_eq!(munki.max(apple), PostAction::Restart);
    }
}
