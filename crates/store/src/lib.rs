#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Property-list document store
//!
//! Every persisted artifact in steward is an Apple property list. This
//! crate reads them into `plist::Value` trees and writes them back
//! atomically (serialize to memory, write a temp file beside the
//! target, rename over it). The store is schemaless; type constraints
//! are enforced by callers through the accessors in `steward-types`.

use plist::{Dictionary, Value};
use std::path::Path;
use steward_errors::{Error, StoreError};

/// Result type for store operations
type Result<T> = std::result::Result<T, Error>;

/// Read a property-list document.
///
/// # Errors
///
/// Returns `StoreError::NotFound` when the file does not exist,
/// `StoreError::Malformed` when it is not a parseable property list,
/// and `StoreError::Io` for any other read failure.
pub async fn read(path: &Path) -> Result<Value> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        Err(e) => {
            return Err(StoreError::Io {
                path: path.display().to_string(),
                detail: e.to_string(),
            }
            .into());
        }
    };
    Value::from_reader(std::io::Cursor::new(bytes)).map_err(|e| {
        StoreError::Malformed {
            path: path.display().to_string(),
            detail: e.to_string(),
        }
        .into()
    })
}

/// Read a property-list document whose root must be a dictionary.
///
/// # Errors
///
/// As [`read`], plus `StoreError::Malformed` when the root value is
/// not a dictionary.
pub async fn read_dict(path: &Path) -> Result<Dictionary> {
    match read(path).await? {
        Value::Dictionary(dict) => Ok(dict),
        _ => Err(StoreError::Malformed {
            path: path.display().to_string(),
            detail: "root value is not a dictionary".into(),
        }
        .into()),
    }
}

/// Write a property-list document atomically.
///
/// The value is serialized as XML in memory, written to a temp file in
/// the destination directory, then renamed over the target so readers
/// never observe a partial document.
///
/// # Errors
///
/// Returns `StoreError::Malformed` if the value cannot be serialized
/// and `StoreError::Io` for any filesystem failure.
pub async fn write(value: &Value, path: &Path) -> Result<()> {
    let mut buf = Vec::new();
    value.to_writer_xml(&mut buf).map_err(|e| StoreError::Malformed {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;

    let io_err = |e: std::io::Error| StoreError::Io {
        path: path.display().to_string(),
        detail: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let tmp = temp_path_for(path);
    tokio::fs::write(&tmp, &buf).await.map_err(io_err)?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(e).into());
    }
    Ok(())
}

/// Write a dictionary document atomically.
///
/// # Errors
///
/// As [`write`].
pub async fn write_dict(dict: &Dictionary, path: &Path) -> Result<()> {
    write(&Value::Dictionary(dict.clone()), path).await
}

fn temp_path_for(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".into());
    name.push_str(&format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}
