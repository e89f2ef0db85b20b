//! Temp-directory lifecycle
//!
//! One shared scratch directory per process, cleaned at the end of the
//! run, plus private directories handed to launchd jobs that outlive
//! the run and are never cleaned here.

use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct TempDirs {
    base: PathBuf,
    shared: Option<PathBuf>,
    counter: u32,
}

impl Default for TempDirs {
    fn default() -> Self {
        Self {
            base: std::env::temp_dir(),
            shared: None,
            counter: 0,
        }
    }
}

impl TempDirs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different base directory. Test seam.
    #[must_use]
    pub fn with_base(base: PathBuf) -> Self {
        Self {
            base,
            shared: None,
            counter: 0,
        }
    }

    /// The per-process shared scratch directory, created on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn shared_dir(&mut self) -> std::io::Result<&Path> {
        if self.shared.is_none() {
            let dir = self.base.join(format!("steward.{}", std::process::id()));
            std::fs::create_dir_all(&dir)?;
            self.shared = Some(dir);
        }
        Ok(self.shared.as_deref().unwrap_or(&self.base))
    }

    /// A fresh private directory the caller owns. Not removed by
    /// [`cleanup`](Self::cleanup).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn private_dir(&mut self, prefix: &str) -> std::io::Result<PathBuf> {
        self.counter += 1;
        let dir = self
            .base
            .join(format!("{prefix}.{}.{}", std::process::id(), self.counter));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Remove the shared directory and everything in it.
    pub fn cleanup(&mut self) {
        if let Some(dir) = self.shared.take() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
