//! Typed view over schemaless pkginfo dictionaries
//!
//! Package records stay `plist::Dictionary` values end to end so
//! unknown keys survive round-trips; this wrapper gives call sites
//! typed accessors for the keys the core consumes.

use crate::RestartAction;
use chrono::{DateTime, Utc};
use plist::{Dictionary, Value};

/// Borrowed view over a package record dictionary.
#[derive(Debug, Clone, Copy)]
pub struct PkgInfo<'a>(pub &'a Dictionary);

impl<'a> PkgInfo<'a> {
    #[must_use]
    pub fn str_key(&self, key: &str) -> Option<&'a str> {
        self.0.get(key).and_then(Value::as_string)
    }

    #[must_use]
    pub fn bool_key(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_boolean)
    }

    #[must_use]
    pub fn int_key(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_signed_integer)
    }

    #[must_use]
    pub fn array_key(&self, key: &str) -> Option<&'a [Value]> {
        self.0.get(key).and_then(Value::as_array).map(Vec::as_slice)
    }

    #[must_use]
    pub fn date_key(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.0.get(key) {
            Some(Value::Date(date)) => {
                Some(DateTime::<Utc>::from(std::time::SystemTime::from(*date)))
            }
            // Some repos carry dates as ISO strings; accept those too.
            Some(Value::String(s)) => s.parse::<DateTime<Utc>>().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(&self) -> Option<&'a str> {
        self.str_key("name")
    }

    #[must_use]
    pub fn display_name(&self) -> &'a str {
        self.str_key("display_name")
            .or_else(|| self.name())
            .unwrap_or("<unknown>")
    }

    #[must_use]
    pub fn version(&self) -> &'a str {
        self.str_key("version").unwrap_or("0")
    }

    #[must_use]
    pub fn version_to_install(&self) -> &'a str {
        self.str_key("version_to_install")
            .or_else(|| self.str_key("version"))
            .unwrap_or("0")
    }

    #[must_use]
    pub fn installer_item(&self) -> Option<&'a str> {
        self.str_key("installer_item")
            .or_else(|| self.str_key("installer_item_location"))
    }

    #[must_use]
    pub fn installer_item_hash(&self) -> Option<&'a str> {
        self.str_key("installer_item_hash")
    }

    #[must_use]
    pub fn installer_item_size(&self) -> Option<i64> {
        self.int_key("installer_item_size")
    }

    #[must_use]
    pub fn installer_type(&self) -> Option<&'a str> {
        self.str_key("installer_type")
    }

    /// File-presence checks used to decide whether the item is installed.
    #[must_use]
    pub fn installs(&self) -> Option<&'a [Value]> {
        self.array_key("installs")
    }

    #[must_use]
    pub fn items_to_copy(&self) -> Option<&'a [Value]> {
        self.array_key("items_to_copy")
    }

    #[must_use]
    pub fn restart_action(&self) -> Option<RestartAction> {
        self.str_key("RestartAction").map(RestartAction::parse)
    }

    #[must_use]
    pub fn force_install_after_date(&self) -> Option<DateTime<Utc>> {
        self.date_key("force_install_after_date")
    }

    #[must_use]
    pub fn unattended_install(&self) -> bool {
        self.bool_key("unattended_install").unwrap_or(false)
    }

    #[must_use]
    pub fn blocking_applications(&self) -> Option<&'a [Value]> {
        self.array_key("blocking_applications")
    }

    #[must_use]
    pub fn uninstall_method(&self) -> Option<&'a str> {
        self.str_key("uninstall_method")
    }

    /// True when every `installs` file check finds its path on disk.
    ///
    /// A record without an `installs` list reports `None`: the caller
    /// decides what no evidence means for its pass.
    #[must_use]
    pub fn installs_satisfied(&self) -> Option<bool> {
        let checks = self.installs()?;
        if checks.is_empty() {
            return None;
        }
        let all_present = checks.iter().all(|entry| {
            entry
                .as_dictionary()
                .and_then(|d| d.get("path"))
                .and_then(Value::as_string)
                .is_some_and(|p| std::path::Path::new(p).exists())
        });
        Some(all_present)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, Value)]) -> Dictionary {
        let mut dict = Dictionary::new();
        for (k, v) in pairs {
            dict.insert((*k).to_string(), v.clone());
        }
        dict
    }

    #[test]
    fn accessors_fall_back_between_spellings() {
        let dict = record(&[
            ("name", Value::String("Firefox".into())),
            ("version", Value::String("129.0".into())),
            (
                "installer_item_location",
                Value::String("apps/Firefox-129.0.dmg".into()),
            ),
        ]);
        let info = PkgInfo(&dict);
        assert_eq!(info.version_to_install(), "129.0");
        assert_eq!(info.installer_item(), Some("apps/Firefox-129.0.dmg"));
        assert_eq!(info.display_name(), "Firefox");
    }

    #[test]
    fn force_install_date_accepts_string_form() {
        let dict = record(&[(
            "force_install_after_date",
            Value::String("2024-06-01T14:00:00Z".into()),
        )]);
        let info = PkgInfo(&dict);
        let date = info.force_install_after_date().unwrap();
        assert_eq!(date.to_rfc3339(), "2024-06-01T14:00:00+00:00");
    }

    #[test]
    fn installs_satisfied_reflects_disk_state() {
        let temp = tempfile::tempdir().unwrap();
        let present = temp.path().join("present");
        std::fs::write(&present, b"x").unwrap();

        let mut check = Dictionary::new();
        check.insert("type".into(), Value::String("file".into()));
        check.insert(
            "path".into(),
            Value::String(present.to_string_lossy().into_owned()),
        );
        let dict = record(&[("installs", Value::Array(vec![Value::Dictionary(check)]))]);
        assert_eq!(PkgInfo(&dict).installs_satisfied(), Some(true));

        let mut missing = Dictionary::new();
        missing.insert(
            "path".into(),
            Value::String(
                temp.path()
                    .join("not-there")
                    .to_string_lossy()
                    .into_owned(),
            ),
        );
        let dict = record(&[("installs", Value::Array(vec![Value::Dictionary(missing)]))]);
        assert_eq!(PkgInfo(&dict).installs_satisfied(), Some(false));

        let dict = record(&[("name", Value::String("NoChecks".into()))]);
        assert_eq!(PkgInfo(&dict).installs_satisfied(), None);
    }
}
