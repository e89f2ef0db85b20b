//! Run report
//!
//! Append-only record of labeled values for one run, persisted to
//! `ManagedInstallReport.plist` for external consumers.

use plist::{Dictionary, Value};
use std::path::Path;
use steward_errors::Result;

#[derive(Debug, Default)]
pub struct Report {
    values: Dictionary,
}

impl Report {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a single labeled value, replacing any previous one.
    pub fn record(&mut self, label: &str, value: Value) {
        self.values.insert(label.to_string(), value);
    }

    pub fn record_str(&mut self, label: &str, value: impl Into<String>) {
        self.record(label, Value::String(value.into()));
    }

    /// Append a value to a list-valued label, creating the list on
    /// first use. Replaces any scalar previously stored there.
    pub fn append(&mut self, label: &str, value: Value) {
        match self.values.get_mut(label) {
            Some(Value::Array(items)) => items.push(value),
            _ => {
                self.values
                    .insert(label.to_string(), Value::Array(vec![value]));
            }
        }
    }

    pub fn append_warning(&mut self, message: impl Into<String>) {
        self.append("Warnings", Value::String(message.into()));
    }

    pub fn append_error(&mut self, message: impl Into<String>) {
        self.append("Errors", Value::String(message.into()));
    }

    #[must_use]
    pub fn get(&self, label: &str) -> Option<&Value> {
        self.values.get(label)
    }

    /// Persist the report atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    pub async fn save(&self, path: &Path) -> Result<()> {
        steward_store::write_dict(&self.values, path).await
    }
}
