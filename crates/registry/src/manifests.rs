//! Active-manifest table
//!
//! Maps manifest names to their cached local paths for the duration
//! of a run. Doubles as the resolver's memoization table and feeds the
//! end-of-run garbage collection of the manifests directory.

use plist::Dictionary;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct ActiveManifests {
    paths: HashMap<String, PathBuf>,
    parsed: HashMap<String, Dictionary>,
}

impl ActiveManifests {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, path: PathBuf, document: Dictionary) {
        self.paths.insert(name.to_string(), path);
        self.parsed.insert(name.to_string(), document);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Dictionary> {
        self.parsed.get(name)
    }

    #[must_use]
    pub fn path(&self, name: &str) -> Option<&Path> {
        self.paths.get(name).map(PathBuf::as_path)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.parsed.contains_key(name)
    }

    /// Basenames of every manifest file touched this run.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .paths
            .values()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.parsed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parsed.is_empty()
    }
}
