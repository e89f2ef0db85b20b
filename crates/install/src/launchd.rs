//! Launchd-supervised child jobs
//!
//! A job gets a unique label, a serialized descriptor on disk (mode
//! 0644, root:wheel when running as root), and dedicated stdout/stderr
//! files. Supervision goes through the [`JobSupervisor`] trait so the
//! executor stays testable with an in-process fake; the production
//! implementation shells out to `launchctl`.

use async_trait::async_trait;
use plist::{Dictionary, Value};
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use steward_errors::{Error, InstallError, Result};
use steward_events::{Event, EventSender, EventSenderExt};
use uuid::Uuid;

const LABEL_PREFIX: &str = "com.googlecode.munki";
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Observable state of a supervised job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    NotLoaded,
    Running,
    Stopped { exit_code: i32 },
}

/// Minimal supervisor surface: load, start, inspect, unload.
#[async_trait]
pub trait JobSupervisor: Send + Sync {
    async fn load(&self, descriptor: &Path) -> Result<()>;
    async fn start(&self, label: &str) -> Result<()>;
    async fn state(&self, label: &str) -> Result<JobState>;
    async fn unload(&self, descriptor: &Path) -> Result<()>;
}

/// Production supervisor shelling out to `launchctl`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Launchctl;

#[async_trait]
impl JobSupervisor for Launchctl {
    async fn load(&self, descriptor: &Path) -> Result<()> {
        launchctl(&["load", &descriptor.display().to_string()]).await
    }

    async fn start(&self, label: &str) -> Result<()> {
        launchctl(&["start", label]).await
    }

    async fn state(&self, label: &str) -> Result<JobState> {
        let output = tokio::process::Command::new("launchctl")
            .arg("list")
            .output()
            .await
            .map_err(|e| job_failed(label, &e.to_string()))?;
        let listing = String::from_utf8_lossy(&output.stdout);
        Ok(parse_job_state(&listing, label))
    }

    async fn unload(&self, descriptor: &Path) -> Result<()> {
        launchctl(&["unload", &descriptor.display().to_string()]).await
    }
}

async fn launchctl(args: &[&str]) -> Result<()> {
    let verb = args.first().copied().unwrap_or("launchctl");
    let output = tokio::process::Command::new("launchctl")
        .args(args)
        .output()
        .await
        .map_err(|e| job_failed(verb, &e.to_string()))?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(job_failed(verb, stderr.trim()))
    }
}

/// Parse one label's row out of `launchctl list` output.
///
/// Rows are `PID\tStatus\tLabel`; a `-` PID means the job is loaded
/// but not running, with Status holding the last exit code.
fn parse_job_state(listing: &str, label: &str) -> JobState {
    for line in listing.lines() {
        let mut fields = line.split_whitespace();
        let (Some(pid), Some(status), Some(row_label)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if row_label != label {
            continue;
        }
        if pid != "-" {
            return JobState::Running;
        }
        let exit_code = status.parse::<i32>().unwrap_or(-1);
        return JobState::Stopped { exit_code };
    }
    JobState::NotLoaded
}

/// A supervised external process with a stable label.
pub struct LaunchdJob {
    label: String,
    descriptor_path: PathBuf,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
    supervisor: Arc<dyn JobSupervisor>,
    events: EventSender,
    cleanup: bool,
}

impl LaunchdJob {
    /// Create a job descriptor for a command line.
    ///
    /// The descriptor lands in `job_dir` with mode 0644, owned
    /// root:wheel when the process runs as root; stdout/stderr files
    /// live beside it.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor cannot be written.
    pub async fn create(
        command: &[String],
        environment: &HashMap<String, String>,
        job_dir: &Path,
        supervisor: Arc<dyn JobSupervisor>,
        events: EventSender,
    ) -> Result<Self> {
        let label = format!("{LABEL_PREFIX}.{}", Uuid::new_v4());
        let descriptor_path = job_dir.join(format!("{label}.plist"));
        let stdout_path = job_dir.join(format!("{label}.stdout"));
        let stderr_path = job_dir.join(format!("{label}.stderr"));

        let mut descriptor = Dictionary::new();
        descriptor.insert("Label".into(), Value::String(label.clone()));
        descriptor.insert(
            "ProgramArguments".into(),
            Value::Array(command.iter().cloned().map(Value::String).collect()),
        );
        if !environment.is_empty() {
            let mut env = Dictionary::new();
            for (key, value) in environment {
                env.insert(key.clone(), Value::String(value.clone()));
            }
            descriptor.insert("EnvironmentVariables".into(), Value::Dictionary(env));
        }
        descriptor.insert(
            "StandardOutPath".into(),
            Value::String(stdout_path.display().to_string()),
        );
        descriptor.insert(
            "StandardErrorPath".into(),
            Value::String(stderr_path.display().to_string()),
        );

        steward_store::write_dict(&descriptor, &descriptor_path).await?;
        tokio::fs::set_permissions(&descriptor_path, std::fs::Permissions::from_mode(0o644))
            .await
            .map_err(|e| Error::io_with_path(&e, &descriptor_path))?;
        if crate::effective_uid() == 0 {
            std::os::unix::fs::chown(&descriptor_path, Some(0), Some(0))
                .map_err(|e| Error::io_with_path(&e, &descriptor_path))?;
        }

        Ok(Self {
            label,
            descriptor_path,
            stdout_path,
            stderr_path,
            supervisor,
            events,
            cleanup: true,
        })
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn stdout_path(&self) -> &Path {
        &self.stdout_path
    }

    #[must_use]
    pub fn stderr_path(&self) -> &Path {
        &self.stderr_path
    }

    /// Keep the descriptor and output files around after
    /// [`finish`](Self::finish).
    pub fn disable_cleanup(&mut self) {
        self.cleanup = false;
    }

    /// Load and start the job.
    ///
    /// # Errors
    ///
    /// Returns an error if the supervisor rejects either step.
    pub async fn start(&self) -> Result<()> {
        self.supervisor.load(&self.descriptor_path).await?;
        self.events.emit(Event::JobLoaded {
            label: self.label.clone(),
        });
        self.supervisor.start(&self.label).await?;
        self.events.emit(Event::JobStarted {
            label: self.label.clone(),
        });
        Ok(())
    }

    /// Poll until the job stops; returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if the supervisor cannot report job state, or
    /// if the job disappears without reporting an exit.
    pub async fn wait(&self) -> Result<i32> {
        loop {
            match self.supervisor.state(&self.label).await? {
                JobState::Stopped { exit_code } => {
                    self.events.emit(Event::JobCompleted {
                        label: self.label.clone(),
                        exit_code,
                    });
                    return Ok(exit_code);
                }
                JobState::NotLoaded => {
                    return Err(job_failed(&self.label, "job vanished before exiting"));
                }
                JobState::Running => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
    }

    /// Unload the job and, unless cleanup is disabled, delete the
    /// descriptor and output files.
    ///
    /// # Errors
    ///
    /// Returns an error if the supervisor fails to unload the job.
    pub async fn finish(self) -> Result<()> {
        let unloaded = self.supervisor.unload(&self.descriptor_path).await;
        if self.cleanup {
            for path in [&self.descriptor_path, &self.stdout_path, &self.stderr_path] {
                let _ = tokio::fs::remove_file(path).await;
            }
        }
        unloaded
    }
}

fn job_failed(label: &str, detail: &str) -> Error {
    InstallError::JobFailed {
        label: label.to_string(),
        detail: detail.to_string(),
    }
    .into()
}
