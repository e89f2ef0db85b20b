//! Typed view over manifest dictionaries
//!
//! Manifests stay schemaless; this wrapper exposes the fields the
//! resolver walks. Missing or mistyped fields read as empty.

use plist::{Dictionary, Value};

/// The manifest list a resolution pass flattens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    ManagedInstalls,
    ManagedUninstalls,
    ManagedUpdates,
    OptionalInstalls,
    DefaultInstalls,
    FeaturedItems,
}

impl Selector {
    /// All selectors in the order a full check runs them.
    pub const ALL: [Self; 6] = [
        Self::ManagedInstalls,
        Self::ManagedUninstalls,
        Self::ManagedUpdates,
        Self::OptionalInstalls,
        Self::DefaultInstalls,
        Self::FeaturedItems,
    ];

    /// The manifest key this selector flattens.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::ManagedInstalls => "managed_installs",
            Self::ManagedUninstalls => "managed_uninstalls",
            Self::ManagedUpdates => "managed_updates",
            Self::OptionalInstalls => "optional_installs",
            Self::DefaultInstalls => "default_installs",
            Self::FeaturedItems => "featured_items",
        }
    }
}

/// Borrowed view over a manifest dictionary.
#[derive(Debug, Clone, Copy)]
pub struct ManifestView<'a>(pub &'a Dictionary);

impl<'a> ManifestView<'a> {
    fn string_list(&self, key: &str) -> Vec<String> {
        self.0
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_string)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The manifest's own catalog list, in order.
    #[must_use]
    pub fn catalogs(&self) -> Vec<String> {
        self.string_list("catalogs")
    }

    /// Names of included manifests, empty entries dropped.
    #[must_use]
    pub fn included_manifests(&self) -> Vec<String> {
        self.string_list("included_manifests")
            .into_iter()
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// Conditional sub-manifests, each carrying a `condition` predicate.
    #[must_use]
    pub fn conditional_items(&self) -> Vec<&'a Dictionary> {
        self.0
            .get("conditional_items")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_dictionary).collect())
            .unwrap_or_default()
    }

    /// Item names under a selector key, in manifest order.
    #[must_use]
    pub fn selector_items(&self, selector: Selector) -> Vec<String> {
        self.string_list(selector.key())
            .into_iter()
            .filter(|name| !name.is_empty())
            .collect()
    }
}
