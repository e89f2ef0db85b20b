//! The install/removal pass
//!
//! Walks the accumulator's item records and performs the side effects,
//! consulting the stop flag between items. Per-item failures are
//! counted and reported; an insecure script skips its item with a
//! warning instead of failing the run.

use crate::copy::{copy_items, remove_any, resolve_destination};
use crate::dmg::DiskImage;
use crate::scripts::{run_embedded_script, ScriptPolicy};
use plist::{Dictionary, Value};
use std::path::{Path, PathBuf};
use steward_config::Preferences;
use steward_errors::{Error, Result, ScriptError};
use steward_events::{Event, EventSender, EventSenderExt};
use steward_registry::StopFlag;
use steward_types::{PkgInfo, PostAction, ResourceKind};

/// Outcome of an install or removal pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallSummary {
    /// Maximum post-action across all processed items.
    pub post_action: PostAction,
    pub succeeded: usize,
    pub failures: usize,
    pub skipped: usize,
}

/// Executes install and removal items.
pub struct Installer {
    prefs: Preferences,
    events: EventSender,
    stop: StopFlag,
    script_policy: ScriptPolicy,
    script_dir: PathBuf,
}

impl Installer {
    #[must_use]
    pub fn new(
        prefs: Preferences,
        events: EventSender,
        stop: StopFlag,
        script_policy: ScriptPolicy,
        script_dir: PathBuf,
    ) -> Self {
        Self {
            prefs,
            events,
            stop,
            script_policy,
            script_dir,
        }
    }

    /// Install every item, in order. A requested stop exits cleanly
    /// between items.
    ///
    /// # Errors
    ///
    /// Per-item failures are counted in the summary, not returned; an
    /// error here means the pass itself could not run.
    pub async fn install_items(&self, items: &[Dictionary]) -> Result<InstallSummary> {
        let mut summary = InstallSummary::default();
        for item in items {
            if self.stop.stop_requested() {
                break;
            }
            let name = PkgInfo(item).display_name().to_string();
            match self.install_one(item).await {
                Ok(action) => {
                    summary.succeeded += 1;
                    summary.post_action = summary.post_action.max(action);
                }
                Err(Error::Script(ScriptError::InsecurePermissions { path, detail })) => {
                    summary.skipped += 1;
                    self.events.emit(Event::warning(format!(
                        "skipping {name}: insecure script at {path}: {detail}"
                    )));
                }
                Err(e) => {
                    summary.failures += 1;
                    self.events
                        .emit(Event::error(format!("install of {name} failed: {e}")));
                }
            }
        }
        Ok(summary)
    }

    /// Remove every item, in order, honoring the stop flag.
    ///
    /// # Errors
    ///
    /// As [`install_items`](Self::install_items).
    pub async fn remove_items(&self, items: &[Dictionary]) -> Result<InstallSummary> {
        let mut summary = InstallSummary::default();
        for item in items {
            if self.stop.stop_requested() {
                break;
            }
            let name = PkgInfo(item).display_name().to_string();
            match self.remove_one(item).await {
                Ok(action) => {
                    summary.succeeded += 1;
                    summary.post_action = summary.post_action.max(action);
                }
                Err(Error::Script(ScriptError::InsecurePermissions { path, detail })) => {
                    summary.skipped += 1;
                    self.events.emit(Event::warning(format!(
                        "skipping removal of {name}: insecure script at {path}: {detail}"
                    )));
                }
                Err(e) => {
                    summary.failures += 1;
                    self.events
                        .emit(Event::error(format!("removal of {name} failed: {e}")));
                }
            }
        }
        Ok(summary)
    }

    async fn install_one(&self, item: &Dictionary) -> Result<PostAction> {
        let pkg = PkgInfo(item);
        self.run_script_field(item, "preinstall_script").await?;

        match pkg.installer_type() {
            Some("copy_from_dmg") | None => {
                let items_to_copy = pkg.items_to_copy().unwrap_or(&[]);
                if items_to_copy.is_empty() {
                    return Err(Error::internal(format!(
                        "{} has no items_to_copy",
                        pkg.display_name()
                    )));
                }
                self.install_from_dmg(item, items_to_copy).await?;
            }
            Some(other) => {
                return Err(Error::internal(format!(
                    "unsupported installer_type {other} for {}",
                    pkg.display_name()
                )));
            }
        }

        self.run_script_field(item, "postinstall_script").await?;
        Ok(pkg.restart_action().unwrap_or_default().post_action())
    }

    async fn install_from_dmg(&self, item: &Dictionary, items_to_copy: &[Value]) -> Result<()> {
        let pkg = PkgInfo(item);
        let installer_item = pkg.installer_item().ok_or_else(|| {
            Error::internal(format!("{} has no installer_item", pkg.display_name()))
        })?;
        let dmg_path =
            ResourceKind::Package.local_path(&self.prefs.managed_install_dir(), installer_item);

        let image = DiskImage::mount(&dmg_path, &self.events).await?;
        let copied = copy_items(image.mount_point(), items_to_copy, &self.events).await;
        let detached = image.detach(&self.events).await;
        copied?;
        detached
    }

    async fn remove_one(&self, item: &Dictionary) -> Result<PostAction> {
        let pkg = PkgInfo(item);
        match pkg.uninstall_method() {
            Some("remove_copied_items") => {
                let items_to_copy = pkg.items_to_copy().unwrap_or(&[]);
                self.remove_copied_items(items_to_copy).await?;
            }
            Some("uninstall_script") | None if pkg.str_key("uninstall_script").is_some() => {
                self.run_script_field(item, "uninstall_script").await?;
            }
            Some(other) => {
                return Err(Error::internal(format!(
                    "unsupported uninstall_method {other} for {}",
                    pkg.display_name()
                )));
            }
            None => {
                return Err(Error::internal(format!(
                    "{} has no uninstall method",
                    pkg.display_name()
                )));
            }
        }
        Ok(pkg.restart_action().unwrap_or_default().post_action())
    }

    /// Delete the destinations that `copy_from_dmg` once created.
    async fn remove_copied_items(&self, items_to_copy: &[Value]) -> Result<()> {
        for entry in items_to_copy.iter().filter_map(Value::as_dictionary) {
            let str_key = |key: &str| entry.get(key).and_then(Value::as_string);
            let Some(source_item) = str_key("source_item") else {
                continue;
            };
            let destination = resolve_destination(
                Path::new(source_item),
                str_key("destination_path"),
                str_key("destination_item"),
            )?;
            remove_any(&destination).await?;
            self.events.emit(Event::debug(format!(
                "removed {}",
                destination.display()
            )));
        }
        Ok(())
    }

    /// Run an embedded script field if the item carries one; a nonzero
    /// exit fails the item.
    async fn run_script_field(&self, item: &Dictionary, field: &str) -> Result<()> {
        if PkgInfo(item).str_key(field).is_none() {
            return Ok(());
        }
        let exit = run_embedded_script(
            field,
            item,
            &self.script_dir,
            &self.script_policy,
            &self.events,
        )
        .await?;
        if exit == 0 {
            Ok(())
        } else {
            Err(Error::internal(format!(
                "{field} for {} returned {exit}",
                PkgInfo(item).display_name()
            )))
        }
    }
}
