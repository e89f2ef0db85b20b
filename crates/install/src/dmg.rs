//! Disk-image mounting
//!
//! Wraps `hdiutil` with plist output parsing. An image already
//! attached by someone else is reused and left mounted; only images we
//! attached ourselves are detached afterwards.

use plist::Value;
use std::path::{Path, PathBuf};
use steward_errors::{Error, InstallError, Result};
use steward_events::{Event, EventSender, EventSenderExt};

/// A mounted disk image.
#[derive(Debug)]
pub struct DiskImage {
    path: PathBuf,
    mount_point: PathBuf,
    we_mounted: bool,
}

impl DiskImage {
    /// Attach a disk image, reusing an existing mount when present.
    ///
    /// # Errors
    ///
    /// Returns `InstallError::MountFailed` when `hdiutil` fails or its
    /// output carries no mount point.
    pub async fn mount(path: &Path, events: &EventSender) -> Result<Self> {
        if let Some(existing) = already_mounted(path).await {
            events.emit(Event::debug(format!(
                "{} already mounted at {}",
                path.display(),
                existing.display()
            )));
            return Ok(Self {
                path: path.to_path_buf(),
                mount_point: existing,
                we_mounted: false,
            });
        }

        events.emit(Event::ImageMounting {
            path: path.to_path_buf(),
        });
        let output = tokio::process::Command::new("hdiutil")
            .arg("attach")
            .arg("-plist")
            .arg("-nobrowse")
            .arg("-readonly")
            .arg("-mountrandom")
            .arg("/tmp")
            .arg(path)
            .output()
            .await
            .map_err(|e| mount_failed(path, &e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(mount_failed(path, stderr.trim()));
        }

        let mount_point = parse_mount_point(&output.stdout)
            .ok_or_else(|| mount_failed(path, "no mount point in hdiutil output"))?;
        events.emit(Event::ImageMounted {
            path: path.to_path_buf(),
            mount_point: mount_point.clone(),
        });
        Ok(Self {
            path: path.to_path_buf(),
            mount_point,
            we_mounted: true,
        })
    }

    #[must_use]
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Detach the image if this instance attached it.
    ///
    /// # Errors
    ///
    /// Returns `InstallError::UnmountFailed` when `hdiutil detach`
    /// fails for a mount we own.
    pub async fn detach(self, events: &EventSender) -> Result<()> {
        if !self.we_mounted {
            return Ok(());
        }
        let output = tokio::process::Command::new("hdiutil")
            .arg("detach")
            .arg("-force")
            .arg(&self.mount_point)
            .output()
            .await
            .map_err(|e| unmount_failed(&self.mount_point, &e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(unmount_failed(&self.mount_point, stderr.trim()));
        }
        events.emit(Event::ImageUnmounted {
            mount_point: self.mount_point.clone(),
        });
        Ok(())
    }
}

fn mount_failed(path: &Path, detail: &str) -> Error {
    InstallError::MountFailed {
        path: path.display().to_string(),
        detail: detail.to_string(),
    }
    .into()
}

fn unmount_failed(mount_point: &Path, detail: &str) -> Error {
    InstallError::UnmountFailed {
        mount_point: mount_point.display().to_string(),
        detail: detail.to_string(),
    }
    .into()
}

/// Check `hdiutil info` for an existing mount of this image.
async fn already_mounted(path: &Path) -> Option<PathBuf> {
    let output = tokio::process::Command::new("hdiutil")
        .arg("info")
        .arg("-plist")
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let value = Value::from_reader(std::io::Cursor::new(output.stdout)).ok()?;
    let images = value.as_dictionary()?.get("images")?.as_array()?;
    for image in images.iter().filter_map(Value::as_dictionary) {
        let image_path = image.get("image-path").and_then(Value::as_string);
        if image_path != Some(&path.display().to_string()) {
            continue;
        }
        if let Some(mount_point) = first_mount_point(image.get("system-entities")) {
            return Some(mount_point);
        }
    }
    None
}

/// Extract the first mount point from `hdiutil` plist output.
fn parse_mount_point(stdout: &[u8]) -> Option<PathBuf> {
    let value = Value::from_reader(std::io::Cursor::new(stdout)).ok()?;
    first_mount_point(value.as_dictionary()?.get("system-entities"))
}

fn first_mount_point(entities: Option<&Value>) -> Option<PathBuf> {
    entities?
        .as_array()?
        .iter()
        .filter_map(Value::as_dictionary)
        .find_map(|entity| {
            entity
                .get("mount-point")
                .and_then(Value::as_string)
                .map(PathBuf::from)
        })
}
