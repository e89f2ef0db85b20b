//! Copy engine for disk-image items
//!
//! Copies items from a mountpoint to their destinations: intermediate
//! directories inherit owner/group/mode from the nearest existing
//! ancestor, the payload lands in a temporary sibling first, loses its
//! quarantine attribute, gets the requested ownership and mode, and
//! finally replaces the destination atomically.

use crate::effective_uid;
use plist::{Dictionary, Value};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use steward_errors::{Error, InstallError, Result};
use steward_events::{Event, EventSender, EventSenderExt};
use uuid::Uuid;

const DEFAULT_OWNER: &str = "root";
const DEFAULT_GROUP: &str = "admin";
const DEFAULT_MODE: &str = "o-w,go+rX";
const DEFAULT_DIR_MODE: u32 = 0o755;

/// Copy every `items_to_copy` entry from a mountpoint.
///
/// # Errors
///
/// Per-item copy, permission, or move failures are fatal for the item
/// and surface as `InstallError` variants.
pub async fn copy_items(
    mount_point: &Path,
    items: &[Value],
    events: &EventSender,
) -> Result<()> {
    for entry in items.iter().filter_map(Value::as_dictionary) {
        copy_one(mount_point, entry, events).await?;
    }
    Ok(())
}

async fn copy_one(mount_point: &Path, entry: &Dictionary, events: &EventSender) -> Result<()> {
    let str_key = |key: &str| entry.get(key).and_then(Value::as_string);

    let source_item = str_key("source_item").ok_or_else(|| InstallError::MissingSourceItem {
        path: mount_point.display().to_string(),
    })?;
    let source = mount_point.join(source_item.trim_start_matches('/'));
    if !source.exists() {
        return Err(InstallError::MissingSourceItem {
            path: source.display().to_string(),
        }
        .into());
    }

    let destination = resolve_destination(&source, str_key("destination_path"), str_key("destination_item"))?;
    let dest_dir = destination.parent().ok_or_else(|| InstallError::InvalidDestination {
        detail: format!("{} has no parent directory", destination.display()),
    })?;
    ensure_directory(dest_dir).await?;

    let staging = dest_dir.join(format!(".steward.{}", Uuid::new_v4()));
    let total = size_of(&source).await?;
    events.emit(Event::CopyStarted {
        source: source.clone(),
        destination: destination.clone(),
        total_bytes: total,
    });

    let result = stage_copy(&source, &staging, &destination, entry, total, events).await;
    if result.is_err() {
        let _ = remove_any(&staging).await;
        return result;
    }

    // Atomic replace: clear the old payload, then rename into place.
    remove_any(&destination).await?;
    tokio::fs::rename(&staging, &destination)
        .await
        .map_err(|e| copy_failed(&destination, &e.to_string()))?;
    events.emit(Event::CopyCompleted {
        destination: destination.clone(),
    });
    Ok(())
}

async fn stage_copy(
    source: &Path,
    staging: &Path,
    destination: &Path,
    entry: &Dictionary,
    total: u64,
    events: &EventSender,
) -> Result<()> {
    let mut copied = 0u64;
    copy_recursive(source, staging, destination, total, &mut copied, events).await?;
    clear_quarantine_recursive(staging).await?;

    let str_key = |key: &str| entry.get(key).and_then(Value::as_string);
    apply_ownership(
        staging,
        str_key("user").unwrap_or(DEFAULT_OWNER),
        str_key("group").unwrap_or(DEFAULT_GROUP),
        str_key("mode").unwrap_or(DEFAULT_MODE),
        events,
    )
    .await
}

/// Work out the final destination path from the item's fields.
///
/// `destination_path` names the directory; `destination_item` names
/// the target (optionally with directory components); the filename
/// falls back to the source basename.
pub(crate) fn resolve_destination(
    source: &Path,
    destination_path: Option<&str>,
    destination_item: Option<&str>,
) -> Result<PathBuf> {
    let source_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match (destination_path, destination_item) {
        (Some(dir), Some(item)) => Ok(Path::new(dir).join(item.trim_start_matches('/'))),
        (Some(dir), None) => Ok(Path::new(dir).join(source_name)),
        (None, Some(item)) if item.contains('/') => Ok(PathBuf::from(item)),
        (None, Some(item)) => Err(InstallError::InvalidDestination {
            detail: format!("destination_item {item} has no directory and no destination_path"),
        }
        .into()),
        (None, None) => Err(InstallError::InvalidDestination {
            detail: "neither destination_path nor destination_item set".into(),
        }
        .into()),
    }
}

/// Create missing directories, each inheriting owner/group/mode from
/// the nearest existing ancestor (mode defaulting to 0755).
///
/// # Errors
///
/// Returns an error if a directory cannot be created.
pub async fn ensure_directory(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }

    let mut missing = vec![path.to_path_buf()];
    let mut ancestor = path.parent();
    while let Some(current) = ancestor {
        if current.exists() {
            break;
        }
        missing.push(current.to_path_buf());
        ancestor = current.parent();
    }

    let (uid, gid, mode) = match ancestor {
        Some(existing) => match tokio::fs::metadata(existing).await {
            Ok(meta) => (meta.uid(), meta.gid(), meta.mode() & 0o777),
            Err(_) => (0, 0, DEFAULT_DIR_MODE),
        },
        None => (0, 0, DEFAULT_DIR_MODE),
    };

    for dir in missing.iter().rev() {
        tokio::fs::create_dir(dir)
            .await
            .map_err(|e| Error::io_with_path(&e, dir))?;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| Error::io_with_path(&e, dir))?;
        if effective_uid() == 0 {
            std::os::unix::fs::chown(dir, Some(uid), Some(gid))
                .map_err(|e| Error::io_with_path(&e, dir))?;
        }
    }
    Ok(())
}

/// Recursively copy, emitting progress against the final destination.
fn copy_recursive<'a>(
    source: &'a Path,
    target: &'a Path,
    destination: &'a Path,
    total: u64,
    copied: &'a mut u64,
    events: &'a EventSender,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + 'a>> {
    Box::pin(async move {
        let meta = tokio::fs::symlink_metadata(source)
            .await
            .map_err(|e| copy_failed(source, &e.to_string()))?;

        if meta.is_dir() {
            tokio::fs::create_dir(target)
                .await
                .map_err(|e| copy_failed(target, &e.to_string()))?;
            tokio::fs::set_permissions(
                target,
                std::fs::Permissions::from_mode(meta.mode() & 0o777),
            )
            .await
            .map_err(|e| copy_failed(target, &e.to_string()))?;

            let mut entries = tokio::fs::read_dir(source)
                .await
                .map_err(|e| copy_failed(source, &e.to_string()))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| copy_failed(source, &e.to_string()))?
            {
                let child_target = target.join(entry.file_name());
                copy_recursive(&entry.path(), &child_target, destination, total, copied, events)
                    .await?;
            }
        } else if meta.is_symlink() {
            let link = tokio::fs::read_link(source)
                .await
                .map_err(|e| copy_failed(source, &e.to_string()))?;
            tokio::fs::symlink(&link, target)
                .await
                .map_err(|e| copy_failed(target, &e.to_string()))?;
        } else {
            tokio::fs::copy(source, target)
                .await
                .map_err(|e| copy_failed(source, &e.to_string()))?;
            *copied += meta.len();
            events.emit(Event::CopyProgress {
                destination: destination.to_path_buf(),
                bytes_copied: *copied,
                total_bytes: total,
            });
        }
        Ok(())
    })
}

/// Strip the `com.apple.quarantine` attribute from a tree.
///
/// # Errors
///
/// Returns an error only when the tree cannot be traversed; a missing
/// attribute is not an error.
pub async fn clear_quarantine_recursive(path: &Path) -> Result<()> {
    remove_quarantine(path);
    if path.is_dir() {
        let mut entries = tokio::fs::read_dir(path)
            .await
            .map_err(|e| Error::io_with_path(&e, path))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io_with_path(&e, path))?
        {
            Box::pin(clear_quarantine_recursive(&entry.path())).await?;
        }
    }
    Ok(())
}

#[cfg(target_os = "macos")]
fn remove_quarantine(path: &Path) {
    use std::os::unix::ffi::OsStrExt;
    let Ok(cpath) = std::ffi::CString::new(path.as_os_str().as_bytes()) else {
        return;
    };
    let Ok(name) = std::ffi::CString::new("com.apple.quarantine") else {
        return;
    };
    #[allow(unsafe_code)]
    // SAFETY: both strings are valid NUL-terminated C strings.
    unsafe {
        libc::removexattr(cpath.as_ptr(), name.as_ptr(), libc::XATTR_NOFOLLOW);
    }
}

#[cfg(not(target_os = "macos"))]
fn remove_quarantine(_path: &Path) {}

/// Apply ownership and mode to a copied tree. Ownership changes need
/// root; mode strings are applied through `chmod` so symbolic forms
/// like `o-w,go+rX` work.
async fn apply_ownership(
    path: &Path,
    owner: &str,
    group: &str,
    mode: &str,
    events: &EventSender,
) -> Result<()> {
    if effective_uid() == 0 {
        run_tool("chown", &["-R", &format!("{owner}:{group}")], path).await?;
    } else {
        events.emit(Event::debug(format!(
            "not running as root; leaving ownership of {} unchanged",
            path.display()
        )));
    }
    run_tool("chmod", &["-R", mode], path).await
}

async fn run_tool(tool: &str, args: &[&str], path: &Path) -> Result<()> {
    let output = tokio::process::Command::new(tool)
        .args(args)
        .arg(path)
        .output()
        .await
        .map_err(|e| ownership_failed(path, &e.to_string()))?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(ownership_failed(path, stderr.trim()))
    }
}

pub(crate) async fn remove_any(path: &Path) -> Result<()> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path)
            .await
            .map_err(|e| Error::io_with_path(&e, path)),
        Ok(_) => tokio::fs::remove_file(path)
            .await
            .map_err(|e| Error::io_with_path(&e, path)),
        Err(_) => Ok(()),
    }
}

async fn size_of(path: &Path) -> Result<u64> {
    let meta = tokio::fs::symlink_metadata(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))?;
    if !meta.is_dir() {
        return Ok(meta.len());
    }
    let mut total = 0u64;
    let mut entries = tokio::fs::read_dir(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::io_with_path(&e, path))?
    {
        total += Box::pin(size_of(&entry.path())).await?;
    }
    Ok(total)
}

fn copy_failed(path: &Path, detail: &str) -> Error {
    InstallError::CopyFailed {
        path: path.display().to_string(),
        detail: detail.to_string(),
    }
    .into()
}

fn ownership_failed(path: &Path, detail: &str) -> Error {
    InstallError::OwnershipFailed {
        path: path.display().to_string(),
        detail: detail.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn item(pairs: &[(&str, &str)]) -> Value {
        let mut dict = Dictionary::new();
        for (k, v) in pairs {
            dict.insert((*k).to_string(), Value::String((*v).to_string()));
        }
        Value::Dictionary(dict)
    }

    fn fake_mount(temp: &Path) -> PathBuf {
        let mount = temp.join("mount");
        std::fs::create_dir_all(mount.join("Tool.app/Contents/MacOS")).unwrap();
        std::fs::write(mount.join("Tool.app/Contents/Info.plist"), b"<plist/>").unwrap();
        std::fs::write(mount.join("Tool.app/Contents/MacOS/tool"), vec![b'x'; 256]).unwrap();
        mount
    }

    #[tokio::test]
    async fn copies_tree_to_destination_path() {
        let temp = tempdir().unwrap();
        let mount = fake_mount(temp.path());
        let dest_dir = temp.path().join("Applications");
        let (tx, mut rx) = steward_events::channel();

        let items = vec![item(&[
            ("source_item", "Tool.app"),
            ("destination_path", dest_dir.to_str().unwrap()),
        ])];
        copy_items(&mount, &items, &tx).await.unwrap();

        assert!(dest_dir.join("Tool.app/Contents/MacOS/tool").exists());
        // No staging droppings.
        let staging: Vec<_> = std::fs::read_dir(&dest_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".steward."))
            .collect();
        assert!(staging.is_empty());

        let mut saw_progress = false;
        let mut saw_completed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                Event::CopyProgress {
                    bytes_copied,
                    total_bytes,
                    ..
                } => {
                    saw_progress = true;
                    assert!(bytes_copied <= total_bytes);
                }
                Event::CopyCompleted { .. } => saw_completed = true,
                _ => {}
            }
        }
        assert!(saw_progress);
        assert!(saw_completed);
    }

    #[tokio::test]
    async fn replaces_existing_destination_atomically() {
        let temp = tempdir().unwrap();
        let mount = fake_mount(temp.path());
        let dest_dir = temp.path().join("Applications");
        let old = dest_dir.join("Tool.app/old-marker");
        std::fs::create_dir_all(old.parent().unwrap()).unwrap();
        std::fs::write(&old, b"stale").unwrap();

        let (tx, _rx) = steward_events::channel();
        let items = vec![item(&[
            ("source_item", "Tool.app"),
            ("destination_path", dest_dir.to_str().unwrap()),
        ])];
        copy_items(&mount, &items, &tx).await.unwrap();

        assert!(!old.exists());
        assert!(dest_dir.join("Tool.app/Contents/Info.plist").exists());
    }

    #[tokio::test]
    async fn destination_item_renames_the_payload() {
        let temp = tempdir().unwrap();
        let mount = fake_mount(temp.path());
        let dest_dir = temp.path().join("Applications");
        let (tx, _rx) = steward_events::channel();

        let items = vec![item(&[
            ("source_item", "Tool.app"),
            ("destination_path", dest_dir.to_str().unwrap()),
            ("destination_item", "Renamed.app"),
        ])];
        copy_items(&mount, &items, &tx).await.unwrap();
        assert!(dest_dir.join("Renamed.app/Contents/Info.plist").exists());
        assert!(!dest_dir.join("Tool.app").exists());
    }

    #[tokio::test]
    async fn full_destination_item_splits_into_directory_and_name() {
        let temp = tempdir().unwrap();
        let mount = fake_mount(temp.path());
        let dest = temp.path().join("Library/Support/Renamed.app");
        let (tx, _rx) = steward_events::channel();

        let items = vec![item(&[
            ("source_item", "Tool.app"),
            ("destination_item", dest.to_str().unwrap()),
        ])];
        copy_items(&mount, &items, &tx).await.unwrap();
        assert!(dest.join("Contents/Info.plist").exists());
    }

    #[tokio::test]
    async fn missing_source_is_an_error() {
        let temp = tempdir().unwrap();
        let mount = fake_mount(temp.path());
        let (tx, _rx) = steward_events::channel();

        let items = vec![item(&[
            ("source_item", "Ghost.app"),
            ("destination_path", temp.path().to_str().unwrap()),
        ])];
        let err = copy_items(&mount, &items, &tx).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Install(InstallError::MissingSourceItem { .. })
        ));
    }

    #[tokio::test]
    async fn bare_destination_item_is_invalid() {
        let temp = tempdir().unwrap();
        let mount = fake_mount(temp.path());
        let (tx, _rx) = steward_events::channel();

        let items = vec![item(&[
            ("source_item", "Tool.app"),
            ("destination_item", "Renamed.app"),
        ])];
        let err = copy_items(&mount, &items, &tx).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Install(InstallError::InvalidDestination { .. })
        ));
    }

    #[tokio::test]
    async fn intermediate_directories_inherit_ancestor_mode() {
        let temp = tempdir().unwrap();
        let base = temp.path().join("base");
        std::fs::create_dir(&base).unwrap();
        std::fs::set_permissions(&base, std::fs::Permissions::from_mode(0o750)).unwrap();

        let deep = base.join("a/b/c");
        ensure_directory(&deep).await.unwrap();

        for dir in [&base.join("a"), &base.join("a/b"), &deep] {
            let mode = std::fs::metadata(dir).unwrap().mode() & 0o777;
            assert_eq!(mode, 0o750, "wrong mode for {}", dir.display());
        }
    }
}
