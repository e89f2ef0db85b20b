#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Pending-update tracking
//!
//! Maintains first-seen timestamps for every pending item across runs
//! so user notifications can escalate with age, and scans pending
//! items for passed force-install deadlines. Two documents back this:
//! `UpdateNotificationTracking.plist` (`category -> name -> firstSeen`)
//! and `AppleUpdateHistory.plist` (`productKey -> record`), the latter
//! preserving timestamps for Apple updates that temporarily vanish
//! from the available-updates list.

mod force;

pub use force::{normalize_force_install_date, PendingUpdateInfo};

use chrono::{DateTime, Utc};
use plist::{Dictionary, Value};
use std::path::Path;
use steward_config::Preferences;
use steward_errors::Result;
use steward_events::{Event, EventSender, EventSenderExt};
use steward_types::{ForceInstallStatus, InstallInfo, PkgInfo};

/// Categories tracked in the notification document.
pub const CATEGORY_INSTALLS: &str = "managed_installs";
pub const CATEGORY_REMOVALS: &str = "removals";
pub const CATEGORY_APPLE: &str = "AppleUpdates";
pub const CATEGORY_STAGED_OS: &str = "StagedOSUpdates";

/// Tracks pending updates across runs.
pub struct UpdateTracker {
    prefs: Preferences,
    events: EventSender,
}

/// One pending item observed in the current run.
#[derive(Debug, Clone)]
struct PendingItem {
    category: &'static str,
    name: String,
    /// Apple updates carry a product key into the history document.
    product_key: Option<String>,
    display_name: Option<String>,
    version: Option<String>,
}

impl UpdateTracker {
    #[must_use]
    pub fn new(prefs: Preferences, events: EventSender) -> Self {
        Self { prefs, events }
    }

    /// Record first-seen timestamps for everything currently pending.
    ///
    /// Carried-forward items keep their original timestamp; Apple
    /// updates source theirs from the history document so they survive
    /// temporarily vanishing from the available list.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracking document cannot be written.
    pub async fn save_pending_update_times(&self) -> Result<()> {
        self.save_pending_update_times_at(Utc::now()).await
    }

    /// As [`save_pending_update_times`](Self::save_pending_update_times)
    /// with an explicit reference instant.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracking document cannot be written.
    pub async fn save_pending_update_times_at(&self, now: DateTime<Utc>) -> Result<()> {
        let pending = self.collect_pending().await;
        let prior = read_tracking(&self.prefs.update_notification_tracking_path()).await;
        let history = self.update_apple_history(&pending, now).await;

        let mut categories: std::collections::BTreeMap<&'static str, Dictionary> =
            std::collections::BTreeMap::new();
        for item in &pending {
            let first_seen = prior_first_seen(&prior, item.category, &item.name)
                .or_else(|| {
                    item.product_key
                        .as_deref()
                        .and_then(|key| history_first_seen(&history, key))
                })
                .unwrap_or(now);
            categories
                .entry(item.category)
                .or_default()
                .insert(item.name.clone(), date_value(first_seen));
        }
        let mut tracking = Dictionary::new();
        for (category, names) in categories {
            tracking.insert(category.to_string(), Value::Dictionary(names));
        }

        steward_store::write_dict(&tracking, &self.prefs.update_notification_tracking_path())
            .await?;
        self.events.emit(Event::PendingUpdatesRecorded {
            count: pending.len(),
        });
        Ok(())
    }

    /// Age in days of the oldest pending update, or 0 when nothing is
    /// pending or the document is unreadable.
    pub async fn oldest_pending_update_in_days(&self) -> f64 {
        self.oldest_pending_update_in_days_at(Utc::now()).await
    }

    /// As [`oldest_pending_update_in_days`](Self::oldest_pending_update_in_days)
    /// with an explicit reference instant.
    #[allow(clippy::cast_precision_loss)]
    pub async fn oldest_pending_update_in_days_at(&self, now: DateTime<Utc>) -> f64 {
        let tracking = read_tracking(&self.prefs.update_notification_tracking_path()).await;
        let oldest = tracking
            .values()
            .filter_map(Value::as_dictionary)
            .flat_map(plist::Dictionary::values)
            .filter_map(as_instant)
            .min()
            .unwrap_or(now);
        let seconds = (now - oldest).num_seconds().max(0);
        seconds as f64 / 86_400.0
    }

    /// Combined pending-update report for external consumers.
    pub async fn pending_update_info(&self) -> PendingUpdateInfo {
        self.pending_update_info_at(Utc::now(), local_offset_seconds())
            .await
    }

    /// As [`pending_update_info`](Self::pending_update_info) with an
    /// explicit reference instant and timezone offset.
    pub async fn pending_update_info_at(
        &self,
        now: DateTime<Utc>,
        offset_seconds: i64,
    ) -> PendingUpdateInfo {
        force::pending_update_info(&self.prefs, now, offset_seconds, self).await
    }

    /// Scan pending items for passed or imminent force-install
    /// deadlines.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures reading the install-info
    /// document set; per-file writeback failures are warnings.
    pub async fn force_install_package_check(&self) -> Result<ForceInstallStatus> {
        self.force_install_package_check_at(Utc::now(), local_offset_seconds())
            .await
    }

    /// As [`force_install_package_check`](Self::force_install_package_check)
    /// with an explicit reference instant and timezone offset.
    ///
    /// # Errors
    ///
    /// As [`force_install_package_check`](Self::force_install_package_check).
    pub async fn force_install_package_check_at(
        &self,
        now: DateTime<Utc>,
        offset_seconds: i64,
    ) -> Result<ForceInstallStatus> {
        force::force_install_check(&self.prefs, &self.events, now, offset_seconds).await
    }

    /// Everything pending right now, from the install-info document,
    /// the Apple-updates document, and any staged OS installer.
    async fn collect_pending(&self) -> Vec<PendingItem> {
        let mut pending = Vec::new();

        if let Ok(value) = steward_store::read(&self.prefs.install_info_path()).await {
            let info = InstallInfo::from_value(&value);
            for record in &info.managed_installs {
                if let Some(name) = PkgInfo(record).name() {
                    pending.push(PendingItem {
                        category: CATEGORY_INSTALLS,
                        name: name.to_string(),
                        product_key: None,
                        display_name: None,
                        version: None,
                    });
                }
            }
            for record in &info.removals {
                if let Some(name) = PkgInfo(record).name() {
                    pending.push(PendingItem {
                        category: CATEGORY_REMOVALS,
                        name: name.to_string(),
                        product_key: None,
                        display_name: None,
                        version: None,
                    });
                }
            }
        }

        for record in self.apple_updates().await {
            let pkg = PkgInfo(&record);
            let Some(name) = pkg.name() else { continue };
            pending.push(PendingItem {
                category: CATEGORY_APPLE,
                name: name.to_string(),
                product_key: pkg.str_key("productKey").map(str::to_string),
                display_name: pkg.str_key("display_name").map(str::to_string),
                version: pkg.str_key("version_to_install").map(str::to_string),
            });
        }

        if let Ok(staged) = steward_store::read_dict(&self.prefs.staged_os_installer_path()).await
        {
            let pkg = PkgInfo(&staged);
            if let Some(name) = pkg.str_key("display_name").or_else(|| pkg.name()) {
                pending.push(PendingItem {
                    category: CATEGORY_STAGED_OS,
                    name: name.to_string(),
                    product_key: None,
                    display_name: None,
                    version: None,
                });
            }
        }

        pending
    }

    pub(crate) async fn apple_updates(&self) -> Vec<Dictionary> {
        let Ok(doc) = steward_store::read_dict(&self.prefs.apple_updates_path()).await else {
            return Vec::new();
        };
        doc.get("AppleUpdates")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_dictionary)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ensure every currently pending Apple update has a history
    /// record; returns the (possibly updated) history document.
    async fn update_apple_history(
        &self,
        pending: &[PendingItem],
        now: DateTime<Utc>,
    ) -> Dictionary {
        let path = self.prefs.apple_update_history_path();
        let mut history = match steward_store::read_dict(&path).await {
            Ok(dict) => dict,
            Err(_) => Dictionary::new(),
        };

        let mut dirty = false;
        for item in pending {
            let Some(key) = item.product_key.as_deref() else {
                continue;
            };
            if history.contains_key(key) {
                continue;
            }
            let mut record = Dictionary::new();
            record.insert("firstSeen".into(), date_value(now));
            if let Some(display_name) = &item.display_name {
                record.insert("display_name".into(), Value::String(display_name.clone()));
            }
            if let Some(version) = &item.version {
                record.insert("version".into(), Value::String(version.clone()));
            }
            history.insert(key.to_string(), Value::Dictionary(record));
            dirty = true;
        }

        if dirty {
            if let Err(e) = steward_store::write_dict(&history, &path).await {
                self.events.emit(Event::warning(format!(
                    "could not update Apple update history: {e}"
                )));
            }
        }
        history
    }
}

/// Seconds east of UTC for the local timezone.
#[must_use]
pub fn local_offset_seconds() -> i64 {
    i64::from(chrono::Local::now().offset().local_minus_utc())
}

async fn read_tracking(path: &Path) -> Dictionary {
    steward_store::read_dict(path).await.unwrap_or_default()
}

fn prior_first_seen(
    tracking: &Dictionary,
    category: &str,
    name: &str,
) -> Option<DateTime<Utc>> {
    tracking
        .get(category)
        .and_then(Value::as_dictionary)?
        .get(name)
        .and_then(as_instant)
}

fn history_first_seen(history: &Dictionary, product_key: &str) -> Option<DateTime<Utc>> {
    history
        .get(product_key)
        .and_then(Value::as_dictionary)?
        .get("firstSeen")
        .and_then(as_instant)
}

pub(crate) fn as_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Date(date) => Some(DateTime::<Utc>::from(std::time::SystemTime::from(*date))),
        Value::String(s) => s.parse::<DateTime<Utc>>().ok(),
        _ => None,
    }
}

pub(crate) fn date_value(when: DateTime<Utc>) -> Value {
    Value::Date(plist::Date::from(std::time::SystemTime::from(when)))
}
