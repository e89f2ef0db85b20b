//! The install-info accumulator
//!
//! Built up by the resolver over multiple passes, then consumed
//! read-only by the executor and the pending-update tracker.

use plist::{Dictionary, Value};

/// Accumulated install/removal decisions for one run.
#[derive(Debug, Clone, Default)]
pub struct InstallInfo {
    pub managed_installs: Vec<Dictionary>,
    pub removals: Vec<Dictionary>,
    pub optional_installs: Vec<Dictionary>,
    pub managed_updates: Vec<Dictionary>,
    pub default_installs: Vec<String>,
    featured_items: Vec<String>,
}

impl InstallInfo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deduplicated, insertion-ordered featured item names.
    #[must_use]
    pub fn featured_items(&self) -> &[String] {
        &self.featured_items
    }

    /// Merge a featured item; returns false if it was already present.
    pub fn add_featured_item(&mut self, name: &str) -> bool {
        if self.featured_items.iter().any(|n| n == name) {
            return false;
        }
        self.featured_items.push(name.to_string());
        true
    }

    pub fn add_default_install(&mut self, name: &str) {
        self.default_installs.push(name.to_string());
    }

    fn list_contains(list: &[Dictionary], name: &str) -> bool {
        list.iter()
            .any(|d| d.get("name").and_then(Value::as_string) == Some(name))
    }

    #[must_use]
    pub fn contains_install(&self, name: &str) -> bool {
        Self::list_contains(&self.managed_installs, name)
    }

    #[must_use]
    pub fn contains_removal(&self, name: &str) -> bool {
        Self::list_contains(&self.removals, name)
    }

    #[must_use]
    pub fn contains_update(&self, name: &str) -> bool {
        Self::list_contains(&self.managed_updates, name)
    }

    #[must_use]
    pub fn contains_optional(&self, name: &str) -> bool {
        Self::list_contains(&self.optional_installs, name)
    }

    /// Serialize to a plist document value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut root = Dictionary::new();
        let to_array = |list: &[Dictionary]| {
            Value::Array(list.iter().cloned().map(Value::Dictionary).collect())
        };
        root.insert("managed_installs".into(), to_array(&self.managed_installs));
        root.insert("removals".into(), to_array(&self.removals));
        root.insert(
            "optional_installs".into(),
            to_array(&self.optional_installs),
        );
        root.insert("managed_updates".into(), to_array(&self.managed_updates));
        root.insert(
            "default_installs".into(),
            Value::Array(
                self.default_installs
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );
        root.insert(
            "featured_items".into(),
            Value::Array(
                self.featured_items
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );
        Value::Dictionary(root)
    }

    /// Rebuild from a previously serialized document. Unknown or
    /// mistyped entries are dropped rather than erroring: a stale
    /// on-disk document must never wedge a run.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let mut info = Self::new();
        let Some(root) = value.as_dictionary() else {
            return info;
        };
        let dict_list = |key: &str| -> Vec<Dictionary> {
            root.get(key)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_dictionary)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        info.managed_installs = dict_list("managed_installs");
        info.removals = dict_list("removals");
        info.optional_installs = dict_list("optional_installs");
        info.managed_updates = dict_list("managed_updates");
        if let Some(items) = root.get("default_installs").and_then(Value::as_array) {
            for item in items.iter().filter_map(Value::as_string) {
                info.add_default_install(item);
            }
        }
        if let Some(items) = root.get("featured_items").and_then(Value::as_array) {
            for item in items.iter().filter_map(Value::as_string) {
                info.add_featured_item(item);
            }
        }
        info
    }
}
