//! Pending-update tracker scenarios

use chrono::{DateTime, TimeZone, Utc};
use plist::{Dictionary, Value};
use std::path::Path;
use steward_config::Preferences;
use steward_tracker::{UpdateTracker, CATEGORY_APPLE, CATEGORY_INSTALLS};
use steward_types::ForceInstallStatus;
use tempfile::TempDir;

fn prefs_for(dir: &Path, extra: &[(&str, Value)]) -> Preferences {
    let mut values = Dictionary::new();
    values.insert(
        "ManagedInstallDir".into(),
        Value::String(dir.to_string_lossy().into_owned()),
    );
    for (key, value) in extra {
        values.insert((*key).to_string(), value.clone());
    }
    Preferences::with_values(dir.join("ManagedInstalls.plist"), values)
}

fn tracker_for(dir: &Path, extra: &[(&str, Value)]) -> UpdateTracker {
    let (tx, _rx) = steward_events::channel();
    UpdateTracker::new(prefs_for(dir, extra), tx)
}

fn date(value: DateTime<Utc>) -> Value {
    Value::Date(plist::Date::from(std::time::SystemTime::from(value)))
}

fn install_record(name: &str, fields: &[(&str, Value)]) -> Value {
    let mut dict = Dictionary::new();
    dict.insert("name".into(), Value::String(name.into()));
    dict.insert("version_to_install".into(), Value::String("1.0".into()));
    for (key, value) in fields {
        dict.insert((*key).to_string(), value.clone());
    }
    Value::Dictionary(dict)
}

async fn write_install_info(dir: &Path, installs: Vec<Value>, removals: Vec<Value>) {
    let mut doc = Dictionary::new();
    doc.insert("managed_installs".into(), Value::Array(installs));
    doc.insert("removals".into(), Value::Array(removals));
    steward_store::write_dict(&doc, &dir.join("InstallInfo.plist"))
        .await
        .unwrap();
}

async fn write_apple_updates(dir: &Path, updates: Vec<Value>) {
    let mut doc = Dictionary::new();
    doc.insert("AppleUpdates".into(), Value::Array(updates));
    steward_store::write_dict(&doc, &dir.join("AppleUpdates.plist"))
        .await
        .unwrap();
}

fn apple_update(name: &str, product_key: &str) -> Value {
    let mut dict = Dictionary::new();
    dict.insert("name".into(), Value::String(name.into()));
    dict.insert("display_name".into(), Value::String(name.into()));
    dict.insert("version_to_install".into(), Value::String("16.1".into()));
    dict.insert("productKey".into(), Value::String(product_key.into()));
    Value::Dictionary(dict)
}

fn tracked_first_seen(tracking: &Dictionary, category: &str, name: &str) -> DateTime<Utc> {
    let entry = tracking
        .get(category)
        .and_then(Value::as_dictionary)
        .and_then(|names| names.get(name))
        .unwrap_or_else(|| panic!("no tracking entry for {category}/{name}"));
    match entry {
        Value::Date(d) => DateTime::<Utc>::from(std::time::SystemTime::from(*d)),
        other => panic!("unexpected value {other:?}"),
    }
}

#[tokio::test]
async fn first_seen_carries_forward_while_pending() {
    let temp = TempDir::new().unwrap();
    let tracker = tracker_for(temp.path(), &[]);
    let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
    let t1 = Utc.with_ymd_and_hms(2024, 6, 2, 8, 0, 0).unwrap();

    write_install_info(temp.path(), vec![install_record("Firefox", &[])], vec![]).await;
    tracker.save_pending_update_times_at(t0).await.unwrap();
    tracker.save_pending_update_times_at(t1).await.unwrap();

    let tracking =
        steward_store::read_dict(&temp.path().join("UpdateNotificationTracking.plist"))
            .await
            .unwrap();
    assert_eq!(
        tracked_first_seen(&tracking, CATEGORY_INSTALLS, "Firefox"),
        t0
    );

    // Once the item is no longer pending its entry is dropped.
    write_install_info(temp.path(), vec![], vec![]).await;
    let t2 = Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap();
    tracker.save_pending_update_times_at(t2).await.unwrap();
    let tracking =
        steward_store::read_dict(&temp.path().join("UpdateNotificationTracking.plist"))
            .await
            .unwrap();
    assert!(tracking
        .get(CATEGORY_INSTALLS)
        .and_then(Value::as_dictionary)
        .is_none_or(plist::Dictionary::is_empty));
}

#[tokio::test]
async fn apple_first_seen_survives_temporary_disappearance() {
    let temp = TempDir::new().unwrap();
    let tracker = tracker_for(temp.path(), &[]);
    let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
    let t1 = Utc.with_ymd_and_hms(2024, 6, 2, 8, 0, 0).unwrap();
    let t2 = Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap();

    // Run N: the update is visible.
    write_apple_updates(
        temp.path(),
        vec![apple_update("macOS Sonoma 14.6", "042-1234")],
    )
    .await;
    tracker.save_pending_update_times_at(t0).await.unwrap();

    // Run N+1: the server hides it.
    write_apple_updates(temp.path(), vec![]).await;
    tracker.save_pending_update_times_at(t1).await.unwrap();

    // Run N+2: it is back, with the same product key.
    write_apple_updates(
        temp.path(),
        vec![apple_update("macOS Sonoma 14.6", "042-1234")],
    )
    .await;
    tracker.save_pending_update_times_at(t2).await.unwrap();

    let tracking =
        steward_store::read_dict(&temp.path().join("UpdateNotificationTracking.plist"))
            .await
            .unwrap();
    assert_eq!(
        tracked_first_seen(&tracking, CATEGORY_APPLE, "macOS Sonoma 14.6"),
        t0
    );
}

#[tokio::test]
async fn oldest_pending_update_age() {
    let temp = TempDir::new().unwrap();
    let tracker = tracker_for(temp.path(), &[]);
    let now = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();

    // Nothing tracked: zero days.
    assert!(tracker.oldest_pending_update_in_days_at(now).await.abs() < f64::EPSILON);

    let mut names = Dictionary::new();
    names.insert(
        "Firefox".into(),
        date(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()),
    );
    names.insert(
        "Slack".into(),
        date(Utc.with_ymd_and_hms(2024, 6, 8, 12, 0, 0).unwrap()),
    );
    let mut tracking = Dictionary::new();
    tracking.insert(CATEGORY_INSTALLS.into(), Value::Dictionary(names));
    steward_store::write_dict(
        &tracking,
        &temp.path().join("UpdateNotificationTracking.plist"),
    )
    .await
    .unwrap();

    let days = tracker.oldest_pending_update_in_days_at(now).await;
    assert!((days - 9.0).abs() < 0.01, "expected 9 days, got {days}");
}

#[tokio::test]
async fn malformed_tracking_document_reads_as_zero_days() {
    let temp = TempDir::new().unwrap();
    let tracker = tracker_for(temp.path(), &[]);
    tokio::fs::write(
        temp.path().join("UpdateNotificationTracking.plist"),
        b"not a plist",
    )
    .await
    .unwrap();
    let days = tracker.oldest_pending_update_in_days_at(Utc::now()).await;
    assert!(days.abs() < f64::EPSILON);
}

#[tokio::test]
async fn force_install_soon_within_window_without_writeback() {
    let temp = TempDir::new().unwrap();
    let tracker = tracker_for(temp.path(), &[]);
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let deadline = Utc.with_ymd_and_hms(2024, 6, 1, 14, 0, 0).unwrap();

    write_install_info(
        temp.path(),
        vec![install_record(
            "SecurityAgent",
            &[("force_install_after_date", date(deadline))],
        )],
        vec![],
    )
    .await;

    let status = tracker.force_install_package_check_at(now, 0).await.unwrap();
    assert_eq!(status, ForceInstallStatus::Soon);

    // Deadline not passed: no unattended flip, no writeback.
    let doc = steward_store::read_dict(&temp.path().join("InstallInfo.plist"))
        .await
        .unwrap();
    let items = doc.get("managed_installs").unwrap().as_array().unwrap();
    assert!(items[0]
        .as_dictionary()
        .unwrap()
        .get("unattended_install")
        .is_none());
}

#[tokio::test]
async fn force_install_past_deadline_with_restart_action() {
    let temp = TempDir::new().unwrap();
    let tracker = tracker_for(temp.path(), &[]);
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 15, 0, 0).unwrap();
    let deadline = Utc.with_ymd_and_hms(2024, 6, 1, 14, 0, 0).unwrap();

    write_install_info(
        temp.path(),
        vec![install_record(
            "SecurityAgent",
            &[
                ("force_install_after_date", date(deadline)),
                ("RestartAction", Value::String("RequireRestart".into())),
            ],
        )],
        vec![],
    )
    .await;

    let status = tracker.force_install_package_check_at(now, 0).await.unwrap();
    assert_eq!(status, ForceInstallStatus::Restart);

    // The item has a RestartAction, so no unattended flip happens.
    let doc = steward_store::read_dict(&temp.path().join("InstallInfo.plist"))
        .await
        .unwrap();
    let items = doc.get("managed_installs").unwrap().as_array().unwrap();
    assert!(items[0]
        .as_dictionary()
        .unwrap()
        .get("unattended_install")
        .is_none());
}

#[tokio::test]
async fn force_install_past_deadline_flips_unattended() {
    let temp = TempDir::new().unwrap();
    let tracker = tracker_for(temp.path(), &[]);
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 15, 0, 0).unwrap();
    let deadline = Utc.with_ymd_and_hms(2024, 6, 1, 14, 0, 0).unwrap();

    write_install_info(
        temp.path(),
        vec![install_record(
            "SecurityAgent",
            &[("force_install_after_date", date(deadline))],
        )],
        vec![],
    )
    .await;

    let status = tracker.force_install_package_check_at(now, 0).await.unwrap();
    assert_eq!(status, ForceInstallStatus::Now);

    // The mutation was written back atomically.
    let doc = steward_store::read_dict(&temp.path().join("InstallInfo.plist"))
        .await
        .unwrap();
    let items = doc.get("managed_installs").unwrap().as_array().unwrap();
    assert_eq!(
        items[0]
            .as_dictionary()
            .unwrap()
            .get("unattended_install")
            .and_then(Value::as_boolean),
        Some(true)
    );
}

#[tokio::test]
async fn force_install_escalation_is_monotone() {
    let temp = TempDir::new().unwrap();
    let tracker = tracker_for(temp.path(), &[]);
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 15, 0, 0).unwrap();
    let soon_deadline = Utc.with_ymd_and_hms(2024, 6, 1, 17, 0, 0).unwrap();
    let past_deadline = Utc.with_ymd_and_hms(2024, 6, 1, 14, 0, 0).unwrap();

    // Only an upcoming deadline: soon.
    write_install_info(
        temp.path(),
        vec![install_record(
            "AppA",
            &[("force_install_after_date", date(soon_deadline))],
        )],
        vec![],
    )
    .await;
    let status = tracker.force_install_package_check_at(now, 0).await.unwrap();
    assert_eq!(status, ForceInstallStatus::Soon);

    // Adding a past-deadline item can only raise the status.
    write_install_info(
        temp.path(),
        vec![
            install_record(
                "AppA",
                &[("force_install_after_date", date(soon_deadline))],
            ),
            install_record(
                "AppB",
                &[
                    ("force_install_after_date", date(past_deadline)),
                    ("RestartAction", Value::String("RequireLogout".into())),
                ],
            ),
        ],
        vec![],
    )
    .await;
    let escalated = tracker.force_install_package_check_at(now, 0).await.unwrap();
    assert!(escalated >= status);
    assert_eq!(escalated, ForceInstallStatus::Logout);
}

#[tokio::test]
async fn apple_updates_consulted_only_when_enabled() {
    let temp = TempDir::new().unwrap();
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 15, 0, 0).unwrap();
    let deadline = Utc.with_ymd_and_hms(2024, 6, 1, 14, 0, 0).unwrap();

    write_install_info(temp.path(), vec![], vec![]).await;
    let mut update = Dictionary::new();
    update.insert("name".into(), Value::String("Safari".into()));
    update.insert("force_install_after_date".into(), date(deadline));
    update.insert("RestartAction".into(), Value::String("RequireRestart".into()));
    write_apple_updates(temp.path(), vec![Value::Dictionary(update)]).await;

    let disabled = tracker_for(temp.path(), &[]);
    let status = disabled.force_install_package_check_at(now, 0).await.unwrap();
    assert_eq!(status, ForceInstallStatus::None);

    let enabled = tracker_for(
        temp.path(),
        &[("InstallAppleSoftwareUpdates", Value::Boolean(true))],
    );
    let status = enabled.force_install_package_check_at(now, 0).await.unwrap();
    assert_eq!(status, ForceInstallStatus::Restart);
}

#[tokio::test]
async fn pending_update_info_combines_sources() {
    let temp = TempDir::new().unwrap();
    let tracker = tracker_for(temp.path(), &[]);
    let now = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
    let deadline = Utc.with_ymd_and_hms(2024, 6, 12, 10, 0, 0).unwrap();

    write_install_info(
        temp.path(),
        vec![
            install_record(
                "Firefox",
                &[("force_install_after_date", date(deadline))],
            ),
            install_record("Slack", &[]),
        ],
        vec![install_record("OldTool", &[])],
    )
    .await;
    write_apple_updates(temp.path(), vec![apple_update("Safari 17.5", "042-9999")]).await;

    let info = tracker.pending_update_info_at(now, 0).await;
    assert_eq!(info.install_count, 2);
    assert_eq!(info.removal_count, 1);
    assert_eq!(info.apple_count, 1);
    assert_eq!(info.pending_count, 4);
    assert_eq!(info.forced_update_due_date, Some(deadline));
}
