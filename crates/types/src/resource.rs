//! Repository resource addressing
//!
//! Every download is identified by a `(kind, name)` pair with a
//! canonical path under the repo URL and a canonical location under
//! the managed-installs directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The kind of a fetchable repository resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Manifest,
    Catalog,
    Package,
    Icon,
    ClientResource,
}

impl ResourceKind {
    /// URL path prefix under the repo root.
    #[must_use]
    pub fn remote_prefix(self) -> &'static str {
        match self {
            Self::Manifest => "manifests",
            Self::Catalog => "catalogs",
            Self::Package => "pkgs",
            Self::Icon => "icons",
            Self::ClientResource => "client_resources",
        }
    }

    /// Directory name under the managed-installs directory.
    #[must_use]
    pub fn local_dir_name(self) -> &'static str {
        match self {
            Self::Manifest => "manifests",
            Self::Catalog => "catalogs",
            Self::Package => "Cache",
            Self::Icon => "icons",
            Self::ClientResource => "client_resources",
        }
    }

    /// Relative URL path for a named resource of this kind.
    #[must_use]
    pub fn remote_path(self, name: &str) -> String {
        format!("{}/{name}", self.remote_prefix())
    }

    /// Canonical local path for a named resource of this kind.
    ///
    /// Package names are repo-relative paths; only their final
    /// component lands in the cache directory.
    #[must_use]
    pub fn local_path(self, managed_install_dir: &Path, name: &str) -> PathBuf {
        let dir = managed_install_dir.join(self.local_dir_name());
        match self {
            Self::Package => {
                let basename = name.rsplit('/').next().unwrap_or(name);
                dir.join(basename)
            }
            _ => dir.join(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_paths_follow_repo_namespace() {
        assert_eq!(
            ResourceKind::Manifest.remote_path("site_default"),
            "manifests/site_default"
        );
        assert_eq!(
            ResourceKind::Package.remote_path("apps/Firefox-129.0.dmg"),
            "pkgs/apps/Firefox-129.0.dmg"
        );
    }

    #[test]
    fn package_cache_path_flattens_subdirectories() {
        let root = Path::new("/Library/Managed Installs");
        assert_eq!(
            ResourceKind::Package.local_path(root, "apps/Firefox-129.0.dmg"),
            root.join("Cache/Firefox-129.0.dmg")
        );
        assert_eq!(
            ResourceKind::Catalog.local_path(root, "production"),
            root.join("catalogs/production")
        );
    }
}
