#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Preferences for the steward managed-software client
//!
//! Preferences live in a property-list document (the ManagedInstalls
//! domain). Reads fall back to hard defaults; the persistent-state
//! keys (`LastCheckDate`, `PendingUpdateCount`, ...) are written back
//! through the same document atomically.

use chrono::{DateTime, Utc};
use plist::{Dictionary, Value};
use std::path::{Path, PathBuf};
use steward_errors::{Error, Result};
use steward_types::ResourceKind;

/// Default location of the preferences document.
pub const DEFAULT_PREFS_PATH: &str = "/Library/Preferences/ManagedInstalls.plist";

/// Default managed-installs directory.
pub const DEFAULT_MANAGED_INSTALL_DIR: &str = "/Library/Managed Installs";

const DEFAULT_REPO_URL: &str = "https://munki/repo";

/// Seconds of grace subtracted from the notification interval so a
/// check that runs slightly early does not push notifications a whole
/// day later every cycle.
const NOTIFICATION_GRACE_SECS: i64 = 6 * 60 * 60;

/// Loaded preferences plus derived filesystem layout.
#[derive(Debug, Clone)]
pub struct Preferences {
    path: PathBuf,
    values: Dictionary,
}

impl Preferences {
    /// Load preferences from a document path.
    ///
    /// A missing document yields all-default preferences; that is the
    /// normal state on a freshly managed machine.
    ///
    /// # Errors
    ///
    /// Returns an error only for unreadable or malformed documents.
    pub async fn load(path: &Path) -> Result<Self> {
        match steward_store::read_dict(path).await {
            Ok(values) => Ok(Self {
                path: path.to_path_buf(),
                values,
            }),
            Err(Error::Store(steward_errors::StoreError::NotFound { .. })) => Ok(Self {
                path: path.to_path_buf(),
                values: Dictionary::new(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Build preferences from in-memory values. Test seam.
    #[must_use]
    pub fn with_values(path: PathBuf, values: Dictionary) -> Self {
        Self { path, values }
    }

    fn str_pref(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(Value::as_string)
            .filter(|s| !s.is_empty())
    }

    fn bool_pref(&self, key: &str, default: bool) -> bool {
        self.values
            .get(key)
            .and_then(Value::as_boolean)
            .unwrap_or(default)
    }

    fn int_pref(&self, key: &str, default: i64) -> i64 {
        self.values
            .get(key)
            .and_then(Value::as_signed_integer)
            .unwrap_or(default)
    }

    fn date_pref(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.values.get(key) {
            Some(Value::Date(date)) => {
                Some(DateTime::<Utc>::from(std::time::SystemTime::from(*date)))
            }
            Some(Value::String(s)) => s.parse::<DateTime<Utc>>().ok(),
            _ => None,
        }
    }

    /// Explicit primary-manifest name, if the admin configured one.
    #[must_use]
    pub fn client_identifier(&self) -> Option<&str> {
        self.str_pref("ClientIdentifier")
    }

    #[must_use]
    pub fn software_repo_url(&self) -> String {
        self.str_pref("SoftwareRepoURL")
            .unwrap_or(DEFAULT_REPO_URL)
            .trim_end_matches('/')
            .to_string()
    }

    #[must_use]
    pub fn install_apple_software_updates(&self) -> bool {
        self.bool_pref("InstallAppleSoftwareUpdates", false)
    }

    #[must_use]
    pub fn apple_software_updates_only(&self) -> bool {
        self.bool_pref("AppleSoftwareUpdatesOnly", false)
    }

    #[must_use]
    pub fn days_between_notifications(&self) -> i64 {
        self.int_pref("DaysBetweenNotifications", 1)
    }

    #[must_use]
    pub fn use_client_certificate(&self) -> bool {
        self.bool_pref("UseClientCertificate", false)
    }

    #[must_use]
    pub fn use_client_certificate_cn_as_client_identifier(&self) -> bool {
        self.bool_pref("UseClientCertificateCNAsClientIdentifier", false)
    }

    #[must_use]
    pub fn last_notified_date(&self) -> Option<DateTime<Utc>> {
        self.date_pref("LastNotifiedDate")
    }

    /// Whether enough time has passed since the last user notification.
    ///
    /// The interval is `DaysBetweenNotifications` days minus a six-hour
    /// grace, so a job that fires a few minutes early still notifies.
    #[must_use]
    pub fn should_notify(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_notified_date() else {
            return true;
        };
        let interval = self.days_between_notifications() * 86_400 - NOTIFICATION_GRACE_SECS;
        (now - last).num_seconds() >= interval
    }

    /// Set a preference value. Takes effect on the next [`save`](Self::save).
    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    /// Set a date preference from an instant.
    pub fn set_date(&mut self, key: &str, when: DateTime<Utc>) {
        self.set(
            key,
            Value::Date(plist::Date::from(std::time::SystemTime::from(when))),
        );
    }

    /// Persist the preferences document atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    pub async fn save(&self) -> Result<()> {
        steward_store::write_dict(&self.values, &self.path).await
    }

    // Filesystem layout under the managed-installs directory.

    #[must_use]
    pub fn managed_install_dir(&self) -> PathBuf {
        self.str_pref("ManagedInstallDir")
            .map_or_else(|| PathBuf::from(DEFAULT_MANAGED_INSTALL_DIR), PathBuf::from)
    }

    #[must_use]
    pub fn resource_dir(&self, kind: ResourceKind) -> PathBuf {
        self.managed_install_dir().join(kind.local_dir_name())
    }

    #[must_use]
    pub fn manifests_dir(&self) -> PathBuf {
        self.resource_dir(ResourceKind::Manifest)
    }

    #[must_use]
    pub fn catalogs_dir(&self) -> PathBuf {
        self.resource_dir(ResourceKind::Catalog)
    }

    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.resource_dir(ResourceKind::Package)
    }

    #[must_use]
    pub fn install_info_path(&self) -> PathBuf {
        self.managed_install_dir().join("InstallInfo.plist")
    }

    #[must_use]
    pub fn apple_updates_path(&self) -> PathBuf {
        self.managed_install_dir().join("AppleUpdates.plist")
    }

    #[must_use]
    pub fn update_notification_tracking_path(&self) -> PathBuf {
        self.managed_install_dir()
            .join("UpdateNotificationTracking.plist")
    }

    #[must_use]
    pub fn apple_update_history_path(&self) -> PathBuf {
        self.managed_install_dir().join("AppleUpdateHistory.plist")
    }

    #[must_use]
    pub fn self_serve_manifest_path(&self) -> PathBuf {
        self.managed_install_dir().join("SelfServeManifest")
    }

    #[must_use]
    pub fn staged_os_installer_path(&self) -> PathBuf {
        self.managed_install_dir().join("StagedOSInstaller.plist")
    }

    #[must_use]
    pub fn report_path(&self) -> PathBuf {
        self.managed_install_dir().join("ManagedInstallReport.plist")
    }

    #[must_use]
    pub fn conditional_items_path(&self) -> PathBuf {
        self.managed_install_dir().join("ConditionalItems.plist")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn prefs(pairs: &[(&str, Value)]) -> Preferences {
        let mut dict = Dictionary::new();
        for (k, v) in pairs {
            dict.insert((*k).to_string(), v.clone());
        }
        Preferences::with_values(PathBuf::from("/tmp/prefs.plist"), dict)
    }

    #[test]
    fn defaults_apply_when_unset() {
        let p = prefs(&[]);
        assert_eq!(p.client_identifier(), None);
        assert_eq!(p.software_repo_url(), DEFAULT_REPO_URL);
        assert!(!p.install_apple_software_updates());
        assert_eq!(p.days_between_notifications(), 1);
        assert_eq!(
            p.managed_install_dir(),
            PathBuf::from(DEFAULT_MANAGED_INSTALL_DIR)
        );
    }

    #[test]
    fn empty_client_identifier_reads_as_none() {
        let p = prefs(&[("ClientIdentifier", Value::String(String::new()))]);
        assert_eq!(p.client_identifier(), None);
        let p = prefs(&[("ClientIdentifier", Value::String("kiosk".into()))]);
        assert_eq!(p.client_identifier(), Some("kiosk"));
    }

    #[test]
    fn repo_url_trailing_slash_is_stripped() {
        let p = prefs(&[(
            "SoftwareRepoURL",
            Value::String("https://repo.corp.example/munki/".into()),
        )]);
        assert_eq!(p.software_repo_url(), "https://repo.corp.example/munki");
    }

    #[test]
    fn notification_throttle_honors_grace() {
        let last = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let p = prefs(&[(
            "LastNotifiedDate",
            Value::Date(plist::Date::from(std::time::SystemTime::from(last))),
        )]);

        // 18 hours later: one day minus the 6-hour grace has elapsed.
        let now = Utc.with_ymd_and_hms(2024, 6, 2, 6, 0, 0).unwrap();
        assert!(p.should_notify(now));

        // 17 hours later: not yet.
        let now = Utc.with_ymd_and_hms(2024, 6, 2, 5, 0, 0).unwrap();
        assert!(!p.should_notify(now));
    }

    #[test]
    fn never_notified_means_notify() {
        let p = prefs(&[]);
        assert!(p.should_notify(Utc::now()));
    }

    #[tokio::test]
    async fn save_and_reload_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("ManagedInstalls.plist");
        let mut p = Preferences::with_values(path.clone(), Dictionary::new());
        p.set("PendingUpdateCount", Value::Integer(3.into()));
        p.set_date(
            "LastCheckDate",
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        );
        p.save().await.unwrap();

        let reloaded = Preferences::load(&path).await.unwrap();
        assert_eq!(reloaded.int_pref("PendingUpdateCount", 0), 3);
        assert!(reloaded.date_pref("LastCheckDate").is_some());
    }

    #[tokio::test]
    async fn missing_document_loads_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let p = Preferences::load(&temp.path().join("absent.plist"))
            .await
            .unwrap();
        assert_eq!(p.software_repo_url(), DEFAULT_REPO_URL);
    }
}
