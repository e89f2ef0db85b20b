//! Per-item processors
//!
//! Invoked by the resolver for every name under a selector list. Each
//! processor consults the catalog set, decides whether an action is
//! needed, and appends a normalized record to the accumulator.

use crate::catalogs::CatalogDb;
use plist::{Dictionary, Value};
use steward_events::{Event, EventSender, EventSenderExt};
use steward_types::{InstallInfo, PkgInfo};

/// Keys copied from a catalog record into an install record.
const CARRIED_KEYS: &[&str] = &[
    "name",
    "display_name",
    "description",
    "RestartAction",
    "installs",
    "installer_type",
    "installer_item_hash",
    "installer_item_size",
    "items_to_copy",
    "preinstall_script",
    "postinstall_script",
    "uninstall_method",
    "uninstall_script",
    "force_install_after_date",
    "unattended_install",
    "blocking_applications",
    "minimum_os_version",
];

pub fn process_install(
    item_ref: &str,
    catalog_list: &[String],
    db: &CatalogDb,
    info: &mut InstallInfo,
    events: &EventSender,
) {
    let Some(item) = db.lookup(item_ref, catalog_list) else {
        events.emit(Event::warning(format!(
            "could not process item {item_ref} for install: no matching item in catalogs {catalog_list:?}"
        )));
        return;
    };
    let pkg = PkgInfo(item);
    let name = pkg.name().unwrap_or(item_ref);
    if info.contains_install(name) {
        return;
    }
    if pkg.installs_satisfied() == Some(true) {
        events.emit(Event::ItemSkipped {
            name: name.to_string(),
            reason: "already installed".into(),
        });
        return;
    }
    let record = build_record(item);
    events.emit(Event::ItemQueued {
        name: name.to_string(),
        version: pkg.version().to_string(),
        action: "install".into(),
    });
    info.managed_installs.push(record);
}

pub fn process_removal(
    item_ref: &str,
    catalog_list: &[String],
    db: &CatalogDb,
    info: &mut InstallInfo,
    events: &EventSender,
) {
    let Some(item) = db.lookup(item_ref, catalog_list) else {
        events.emit(Event::warning(format!(
            "could not process item {item_ref} for removal: no matching item in catalogs {catalog_list:?}"
        )));
        return;
    };
    let pkg = PkgInfo(item);
    let name = pkg.name().unwrap_or(item_ref);
    if info.contains_removal(name) {
        return;
    }
    if info.contains_install(name) {
        events.emit(Event::warning(format!(
            "{name} is both a managed install and a managed uninstall; skipping removal"
        )));
        return;
    }
    // No evidence of installation means nothing to remove.
    if pkg.installs_satisfied() == Some(false) {
        events.emit(Event::ItemSkipped {
            name: name.to_string(),
            reason: "not installed".into(),
        });
        return;
    }
    let record = build_record(item);
    events.emit(Event::ItemQueued {
        name: name.to_string(),
        version: pkg.version().to_string(),
        action: "removal".into(),
    });
    info.removals.push(record);
}

pub fn process_update(
    item_ref: &str,
    catalog_list: &[String],
    db: &CatalogDb,
    info: &mut InstallInfo,
    events: &EventSender,
) {
    let Some(item) = db.lookup(item_ref, catalog_list) else {
        events.emit(Event::warning(format!(
            "could not process item {item_ref} for update: no matching item in catalogs {catalog_list:?}"
        )));
        return;
    };
    let pkg = PkgInfo(item);
    let name = pkg.name().unwrap_or(item_ref);
    // Items already scheduled for install or removal take precedence.
    if info.contains_install(name) || info.contains_removal(name) || info.contains_update(name) {
        return;
    }
    // Updates apply only to items with evidence of being installed.
    if pkg.installs_satisfied() != Some(true) {
        events.emit(Event::ItemSkipped {
            name: name.to_string(),
            reason: "not installed, update does not apply".into(),
        });
        return;
    }
    let record = build_record(item);
    events.emit(Event::ItemQueued {
        name: name.to_string(),
        version: pkg.version().to_string(),
        action: "update".into(),
    });
    info.managed_updates.push(record);
}

pub fn process_optional(
    item_ref: &str,
    catalog_list: &[String],
    db: &CatalogDb,
    info: &mut InstallInfo,
    events: &EventSender,
) {
    let Some(item) = db.lookup(item_ref, catalog_list) else {
        events.emit(Event::warning(format!(
            "could not process optional item {item_ref}: no matching item in catalogs {catalog_list:?}"
        )));
        return;
    };
    let pkg = PkgInfo(item);
    let name = pkg.name().unwrap_or(item_ref);
    if info.contains_optional(name) {
        return;
    }
    let mut record = build_record(item);
    record.insert(
        "installed".into(),
        Value::Boolean(pkg.installs_satisfied().unwrap_or(false)),
    );
    info.optional_installs.push(record);
}

/// Normalize a catalog record into an accumulator record.
fn build_record(item: &Dictionary) -> Dictionary {
    let mut record = Dictionary::new();
    for key in CARRIED_KEYS {
        if let Some(value) = item.get(*key) {
            record.insert((*key).to_string(), value.clone());
        }
    }
    let pkg = PkgInfo(item);
    record.insert(
        "version_to_install".into(),
        Value::String(pkg.version().to_string()),
    );
    if let Some(location) = pkg.installer_item() {
        record.insert("installer_item".into(), Value::String(location.to_string()));
    }
    record
}
