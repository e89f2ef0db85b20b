//! Catalog cache and item lookup
//!
//! Catalogs are property-list arrays of pkginfo dictionaries, fetched
//! once per run and indexed by item name. Lookup walks the effective
//! catalog list in order; within a catalog the highest version wins.

use plist::{Dictionary, Value};
use std::collections::HashMap;
use steward_types::{compare_versions, PkgInfo};

/// In-memory catalog set for one run.
#[derive(Debug, Default)]
pub struct CatalogDb {
    catalogs: HashMap<String, Vec<Dictionary>>,
}

impl CatalogDb {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.catalogs.contains_key(name)
    }

    /// Register a parsed catalog. Non-dictionary entries are dropped.
    pub fn insert(&mut self, name: &str, value: &Value) {
        let items = value
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(Value::as_dictionary)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        self.catalogs.insert(name.to_string(), items);
    }

    /// Find the best record for an item reference in the given catalog
    /// order. `item_ref` may be a bare name (highest version wins) or
    /// carry an explicit version (`Firefox--129.0` or `Firefox-129.0`).
    #[must_use]
    pub fn lookup(&self, item_ref: &str, catalog_list: &[String]) -> Option<&Dictionary> {
        for catalog in catalog_list {
            let Some(items) = self.catalogs.get(catalog) else {
                continue;
            };
            if let Some(found) = best_match(items, item_ref) {
                return Some(found);
            }
        }
        None
    }
}

fn best_match<'a>(items: &'a [Dictionary], item_ref: &str) -> Option<&'a Dictionary> {
    // Bare name: newest version of that name.
    if let Some(found) = highest_version(items, item_ref, None) {
        return Some(found);
    }
    // name-version spelling: exact or prefixed version match.
    let (name, version) = split_name_version(item_ref)?;
    highest_version(items, name, Some(version))
}

fn highest_version<'a>(
    items: &'a [Dictionary],
    name: &str,
    version: Option<&str>,
) -> Option<&'a Dictionary> {
    items
        .iter()
        .filter(|item| PkgInfo(item).name() == Some(name))
        .filter(|item| {
            version.is_none_or(|wanted| {
                let have = PkgInfo(item).version();
                have == wanted || have.starts_with(&format!("{wanted}."))
            })
        })
        .max_by(|a, b| compare_versions(PkgInfo(a).version(), PkgInfo(b).version()))
}

/// Split an explicit-version item reference into name and version.
///
/// `--` always splits; a single `-` splits only when what follows
/// starts with a digit, so names with dashes stay intact.
#[must_use]
pub fn split_name_version(item_ref: &str) -> Option<(&str, &str)> {
    if let Some((name, version)) = item_ref.rsplit_once("--") {
        if !name.is_empty() && !version.is_empty() {
            return Some((name, version));
        }
    }
    let (name, version) = item_ref.rsplit_once('-')?;
    if !name.is_empty() && version.starts_with(|c: char| c.is_ascii_digit()) {
        Some((name, version))
    } else {
        None
    }
}
