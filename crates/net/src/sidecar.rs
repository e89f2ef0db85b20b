//! Per-download sidecar metadata
//!
//! A small property-list mapping (`etag`, `last-modified`,
//! `expected-length`) stored alongside each cached download. On macOS
//! it rides in an extended attribute on the destination file; on other
//! platforms it lives in an adjacent `<file>.download` file. While
//! `expected-length` is present the download is known incomplete and
//! eligible for resume; a completed download has it cleared.

use plist::{Dictionary, Value};
use std::io;
use std::path::{Path, PathBuf};

/// Extended-attribute name carrying the sidecar on macOS.
pub const SIDECAR_XATTR: &str = "com.googlecode.munki.downloadData";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sidecar {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub expected_length: Option<String>,
}

impl Sidecar {
    /// True when the sidecar carries at least one cache validator.
    #[must_use]
    pub fn has_validator(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }

    /// Expected total length in bytes, if recorded and numeric.
    #[must_use]
    pub fn expected_length_bytes(&self) -> Option<u64> {
        self.expected_length.as_deref()?.parse().ok()
    }

    /// Read the sidecar for a destination file. Missing or unparseable
    /// metadata reads as absent.
    #[must_use]
    pub fn read(destination: &Path) -> Option<Self> {
        let bytes = carrier::read(destination)?;
        Self::from_bytes(&bytes)
    }

    /// Store the sidecar for a destination file.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be written.
    pub fn write(&self, destination: &Path) -> io::Result<()> {
        carrier::write(destination, &self.to_bytes())
    }

    /// Remove any sidecar for a destination file.
    pub fn remove(destination: &Path) {
        carrier::remove(destination);
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut dict = Dictionary::new();
        if let Some(etag) = &self.etag {
            dict.insert("etag".into(), Value::String(etag.clone()));
        }
        if let Some(last_modified) = &self.last_modified {
            dict.insert("last-modified".into(), Value::String(last_modified.clone()));
        }
        if let Some(expected) = &self.expected_length {
            dict.insert("expected-length".into(), Value::String(expected.clone()));
        }
        let mut buf = Vec::new();
        // Serializing a string-only dictionary cannot fail.
        let _ = Value::Dictionary(dict).to_writer_xml(&mut buf);
        buf
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let value = Value::from_reader(io::Cursor::new(bytes)).ok()?;
        let dict = value.as_dictionary()?;
        let field = |key: &str| {
            dict.get(key)
                .and_then(Value::as_string)
                .map(str::to_string)
        };
        Some(Self {
            etag: field("etag"),
            last_modified: field("last-modified"),
            expected_length: field("expected-length"),
        })
    }
}

/// Adjacent sidecar file path used on platforms without xattr support.
#[must_use]
pub fn adjacent_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".download");
    destination.with_file_name(name)
}

#[cfg(target_os = "macos")]
mod carrier {
    use super::SIDECAR_XATTR;
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    fn cpath(path: &Path) -> Option<CString> {
        CString::new(path.as_os_str().as_bytes()).ok()
    }

    fn cname() -> CString {
        // The attribute name contains no interior NULs.
        CString::new(SIDECAR_XATTR).unwrap_or_default()
    }

    pub fn read(destination: &Path) -> Option<Vec<u8>> {
        let path = cpath(destination)?;
        let name = cname();
        #[allow(unsafe_code)]
        // SAFETY: both strings are valid NUL-terminated C strings.
        unsafe {
            let size = libc::getxattr(
                path.as_ptr(),
                name.as_ptr(),
                std::ptr::null_mut(),
                0,
                0,
                0,
            );
            if size < 0 {
                return None;
            }
            #[allow(clippy::cast_sign_loss)]
            let mut buf = vec![0u8; size as usize];
            let read = libc::getxattr(
                path.as_ptr(),
                name.as_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                0,
                0,
            );
            if read < 0 {
                return None;
            }
            #[allow(clippy::cast_sign_loss)]
            buf.truncate(read as usize);
            Some(buf)
        }
    }

    pub fn write(destination: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let path = cpath(destination).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path contains NUL")
        })?;
        let name = cname();
        #[allow(unsafe_code)]
        // SAFETY: both strings are valid NUL-terminated C strings.
        let rc = unsafe {
            libc::setxattr(
                path.as_ptr(),
                name.as_ptr(),
                bytes.as_ptr().cast(),
                bytes.len(),
                0,
                0,
            )
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    pub fn remove(destination: &Path) {
        let Some(path) = cpath(destination) else {
            return;
        };
        let name = cname();
        #[allow(unsafe_code)]
        // SAFETY: both strings are valid NUL-terminated C strings.
        unsafe {
            libc::removexattr(path.as_ptr(), name.as_ptr(), 0);
        }
    }
}

#[cfg(not(target_os = "macos"))]
mod carrier {
    use std::path::Path;

    pub fn read(destination: &Path) -> Option<Vec<u8>> {
        std::fs::read(super::adjacent_path(destination)).ok()
    }

    pub fn write(destination: &Path, bytes: &[u8]) -> std::io::Result<()> {
        std::fs::write(super::adjacent_path(destination), bytes)
    }

    pub fn remove(destination: &Path) {
        let _ = std::fs::remove_file(super::adjacent_path(destination));
    }
}
