//! Force-install deadline scanning
//!
//! Items carrying `force_install_after_date` escalate once their
//! deadline passes: `now` for ordinary items, `logout`/`restart` when
//! the item demands one, with a `soon` warning inside a four-hour
//! window. Deadlines are stored as naive-local instants; reads
//! normalize by subtracting the local UTC offset in exactly one place.

use crate::UpdateTracker;
use chrono::{DateTime, Duration, Utc};
use plist::Value;
use steward_config::Preferences;
use steward_errors::Result;
use steward_events::{Event, EventSender, EventSenderExt};
use steward_types::{ForceInstallStatus, InstallInfo, PkgInfo, RestartAction};

/// Window before a deadline in which the status becomes `soon`.
const SOON_WINDOW_HOURS: i64 = 4;

/// Combined pending-update report record.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdateInfo {
    pub install_count: usize,
    pub removal_count: usize,
    pub apple_count: usize,
    pub pending_count: usize,
    pub oldest_pending_days: f64,
    /// Earliest normalized force-install deadline across managed
    /// installs and Apple updates.
    pub forced_update_due_date: Option<DateTime<Utc>>,
}

/// Convert a raw stored deadline to an actual instant by subtracting
/// the recorded timezone offset. The single normalization site.
#[must_use]
pub fn normalize_force_install_date(
    raw: DateTime<Utc>,
    offset_seconds: i64,
) -> DateTime<Utc> {
    raw - Duration::seconds(offset_seconds)
}

pub(crate) async fn pending_update_info(
    prefs: &Preferences,
    now: DateTime<Utc>,
    offset_seconds: i64,
    tracker: &UpdateTracker,
) -> PendingUpdateInfo {
    let info = match steward_store::read(&prefs.install_info_path()).await {
        Ok(value) => InstallInfo::from_value(&value),
        Err(_) => InstallInfo::new(),
    };
    let apple = tracker.apple_updates().await;

    let mut earliest: Option<DateTime<Utc>> = None;
    for record in info.managed_installs.iter().chain(apple.iter()) {
        if let Some(raw) = PkgInfo(record).force_install_after_date() {
            let due = normalize_force_install_date(raw, offset_seconds);
            earliest = Some(earliest.map_or(due, |current| current.min(due)));
        }
    }

    let install_count = info.managed_installs.len();
    let removal_count = info.removals.len();
    let apple_count = apple.len();
    PendingUpdateInfo {
        install_count,
        removal_count,
        apple_count,
        pending_count: install_count + removal_count + apple_count,
        oldest_pending_days: tracker.oldest_pending_update_in_days_at(now).await,
        forced_update_due_date: earliest,
    }
}

pub(crate) async fn force_install_check(
    prefs: &Preferences,
    events: &EventSender,
    now: DateTime<Utc>,
    offset_seconds: i64,
) -> Result<ForceInstallStatus> {
    let mut consult = vec![(prefs.install_info_path(), "managed_installs")];
    if prefs.install_apple_software_updates() || prefs.apple_software_updates_only() {
        consult.push((prefs.apple_updates_path(), "AppleUpdates"));
    }

    let mut result = ForceInstallStatus::None;
    for (path, key) in consult {
        let Ok(mut document) = steward_store::read_dict(&path).await else {
            continue;
        };
        let Some(items) = document.get(key).and_then(Value::as_array).cloned() else {
            continue;
        };

        // Mutation during iteration is modeled as building a new list
        // with a dirty flag; the document is written back only when an
        // item actually changed.
        let mut rewritten = Vec::with_capacity(items.len());
        let mut dirty = false;

        for item in items {
            let Some(dict) = item.as_dictionary() else {
                rewritten.push(item);
                continue;
            };
            let pkg = PkgInfo(dict);
            let Some(raw_deadline) = pkg.force_install_after_date() else {
                rewritten.push(item);
                continue;
            };
            let deadline = normalize_force_install_date(raw_deadline, offset_seconds);

            if now >= deadline {
                result = result.max(ForceInstallStatus::Now);
                match pkg.restart_action() {
                    Some(RestartAction::RequireLogout) => {
                        result = result.max(ForceInstallStatus::Logout);
                    }
                    Some(RestartAction::RequireRestart | RestartAction::RecommendRestart) => {
                        result = result.max(ForceInstallStatus::Restart);
                    }
                    Some(RestartAction::None) => {}
                    None => {
                        if !pkg.unattended_install() {
                            let mut updated = dict.clone();
                            updated.insert("unattended_install".into(), Value::Boolean(true));
                            rewritten.push(Value::Dictionary(updated));
                            dirty = true;
                            events.emit(Event::ForceInstallDeadline {
                                name: pkg.display_name().to_string(),
                                status: ForceInstallStatus::Now.to_string(),
                            });
                            continue;
                        }
                    }
                }
                events.emit(Event::ForceInstallDeadline {
                    name: pkg.display_name().to_string(),
                    status: result.to_string(),
                });
            } else if now + Duration::hours(SOON_WINDOW_HOURS) >= deadline {
                result = result.max(ForceInstallStatus::Soon);
            }
            rewritten.push(item);
        }

        if dirty {
            document.insert(key.to_string(), Value::Array(rewritten));
            if let Err(e) = steward_store::write_dict(&document, &path).await {
                events.emit(Event::warning(format!(
                    "could not write back {}: {e}",
                    path.display()
                )));
            }
        }
    }
    Ok(result)
}
