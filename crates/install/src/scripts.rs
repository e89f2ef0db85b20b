//! Script execution with permission gating
//!
//! External scripts must pass a permission check before running:
//! trusted owner, trusted group, no world-write bit, executable bit.
//! Embedded scripts are string values in a pkginfo record,
//! materialized to a mode-0700 temp file and run the same way.
//! Stdout streams into the display pipeline line by line; stderr is
//! captured and emitted, dash-framed, when the script fails.

use plist::Dictionary;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use std::time::Duration;
use steward_errors::{Error, Result, ScriptError};
use steward_events::{Event, EventSender, EventSenderExt};
use steward_types::PkgInfo;
use tokio::io::AsyncBufReadExt;

const WHEEL_GID: u32 = 0;
const ADMIN_GID: u32 = 80;

/// Who may own an executable script and how long it may run.
#[derive(Debug, Clone)]
pub struct ScriptPolicy {
    pub allowed_uids: Vec<u32>,
    pub allowed_gids: Vec<u32>,
    pub timeout: Duration,
}

impl Default for ScriptPolicy {
    fn default() -> Self {
        Self {
            allowed_uids: vec![0, crate::effective_uid()],
            allowed_gids: vec![WHEEL_GID, ADMIN_GID],
            timeout: Duration::from_secs(60),
        }
    }
}

/// Verify a script is safe to execute.
///
/// # Errors
///
/// Returns `ScriptError::InsecurePermissions` naming the failed check.
pub fn check_script_permissions(path: &Path, policy: &ScriptPolicy) -> Result<()> {
    let insecure = |detail: String| -> Error {
        ScriptError::InsecurePermissions {
            path: path.display().to_string(),
            detail,
        }
        .into()
    };

    let meta = std::fs::metadata(path).map_err(|e| Error::io_with_path(&e, path))?;
    if !policy.allowed_uids.contains(&meta.uid()) {
        return Err(insecure(format!("owner uid {} is not trusted", meta.uid())));
    }
    if !policy.allowed_gids.contains(&meta.gid()) {
        return Err(insecure(format!("group gid {} is not trusted", meta.gid())));
    }
    let mode = meta.mode();
    if mode & 0o002 != 0 {
        return Err(insecure("script is world-writable".into()));
    }
    if mode & 0o111 == 0 {
        return Err(insecure("script is not executable".into()));
    }
    Ok(())
}

/// Run an external script after the permission check.
///
/// Returns the exit code; a nonzero exit is reported through events
/// (dash-framed, error level) but is the caller's to act on.
///
/// # Errors
///
/// Returns `ScriptError::InsecurePermissions` for a script failing the
/// gate, `ScriptError::Timeout` when the run exceeds the policy
/// timeout, and `ScriptError::LaunchFailed` when it cannot start.
pub async fn run_script(
    path: &Path,
    args: &[&str],
    policy: &ScriptPolicy,
    events: &EventSender,
) -> Result<i32> {
    check_script_permissions(path, policy)?;
    events.emit(Event::ScriptStarting {
        path: path.to_path_buf(),
    });

    let mut child = tokio::process::Command::new(path)
        .args(args)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| ScriptError::LaunchFailed {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let events_clone = events.clone();
    let stdout_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        if let Some(stdout) = stdout {
            let mut reader = tokio::io::BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                events_clone.emit(Event::ScriptOutput { line: line.clone() });
                lines.push(line);
            }
        }
        lines
    });
    let stderr_task = tokio::spawn(async move {
        let mut captured = String::new();
        if let Some(stderr) = stderr {
            let mut reader = tokio::io::BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                captured.push_str(&line);
                captured.push('\n');
            }
        }
        captured
    });

    let status = match tokio::time::timeout(policy.timeout, child.wait()).await {
        Ok(status) => status.map_err(|e| ScriptError::LaunchFailed {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?,
        Err(_) => {
            let _ = child.kill().await;
            return Err(ScriptError::Timeout {
                path: path.display().to_string(),
                seconds: policy.timeout.as_secs(),
            }
            .into());
        }
    };

    let stdout_lines = stdout_task.await.unwrap_or_default();
    let stderr_text = stderr_task.await.unwrap_or_default();
    let exit_code = status.code().unwrap_or(-1);

    if exit_code != 0 {
        events.emit(Event::error(format!(
            "{} returned {exit_code}",
            path.display()
        )));
        events.emit(Event::error("-".repeat(78)));
        for line in &stdout_lines {
            events.emit(Event::error(line.clone()));
        }
        for line in stderr_text.lines() {
            events.emit(Event::error(line.to_string()));
        }
        events.emit(Event::error("-".repeat(78)));
    }

    events.emit(Event::ScriptCompleted {
        path: path.to_path_buf(),
        exit_code,
    });
    Ok(exit_code)
}

/// Materialize and run a script embedded in a pkginfo record.
///
/// The script text is written to `script_dir` with mode 0700 and
/// executed under the same policy as an external script.
///
/// # Errors
///
/// Returns `ScriptError::MissingScript` when the field is absent, plus
/// any error [`run_script`] can produce.
pub async fn run_embedded_script(
    field: &str,
    pkginfo: &Dictionary,
    script_dir: &Path,
    policy: &ScriptPolicy,
    events: &EventSender,
) -> Result<i32> {
    let text = PkgInfo(pkginfo)
        .str_key(field)
        .ok_or_else(|| ScriptError::MissingScript {
            field: field.to_string(),
        })?;

    let name = PkgInfo(pkginfo).name().unwrap_or("item");
    let path = script_dir.join(format!("{name}.{field}"));
    tokio::fs::write(&path, text)
        .await
        .map_err(|e| Error::io_with_path(&e, &path))?;
    tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))
        .await
        .map_err(|e| Error::io_with_path(&e, &path))?;

    let result = run_script(&path, &[], policy, events).await;
    let _ = tokio::fs::remove_file(&path).await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use plist::Value;
    use tempfile::tempdir;

    fn permissive_policy() -> ScriptPolicy {
        ScriptPolicy {
            allowed_uids: vec![crate::effective_uid()],
            allowed_gids: vec![crate::effective_gid()],
            timeout: Duration::from_secs(10),
        }
    }

    fn write_script(dir: &Path, name: &str, body: &str, mode: u32) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn world_writable_script_is_rejected() {
        let temp = tempdir().unwrap();
        let path = write_script(temp.path(), "evil.sh", "#!/bin/sh\nexit 0\n", 0o777);
        let err = check_script_permissions(&path, &permissive_policy()).unwrap_err();
        assert!(matches!(
            err,
            Error::Script(ScriptError::InsecurePermissions { .. })
        ));
    }

    #[test]
    fn non_executable_script_is_rejected() {
        let temp = tempdir().unwrap();
        let path = write_script(temp.path(), "flat.sh", "#!/bin/sh\nexit 0\n", 0o600);
        let err = check_script_permissions(&path, &permissive_policy()).unwrap_err();
        assert!(matches!(
            err,
            Error::Script(ScriptError::InsecurePermissions { .. })
        ));
    }

    #[test]
    fn untrusted_group_is_rejected() {
        let temp = tempdir().unwrap();
        let path = write_script(temp.path(), "ok.sh", "#!/bin/sh\nexit 0\n", 0o700);
        let policy = ScriptPolicy {
            allowed_uids: vec![crate::effective_uid()],
            allowed_gids: vec![],
            timeout: Duration::from_secs(10),
        };
        let err = check_script_permissions(&path, &policy).unwrap_err();
        assert!(matches!(
            err,
            Error::Script(ScriptError::InsecurePermissions { .. })
        ));
    }

    #[tokio::test]
    async fn insecure_script_is_never_executed() {
        let temp = tempdir().unwrap();
        let marker = temp.path().join("ran");
        let body = format!("#!/bin/sh\ntouch {}\n", marker.display());
        let path = write_script(temp.path(), "evil.sh", &body, 0o777);

        let (tx, _rx) = steward_events::channel();
        let err = run_script(&path, &[], &permissive_policy(), &tx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Script(ScriptError::InsecurePermissions { .. })
        ));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn stdout_streams_as_events() {
        let temp = tempdir().unwrap();
        let path = write_script(
            temp.path(),
            "hello.sh",
            "#!/bin/sh\necho first\necho second\nexit 0\n",
            0o700,
        );

        let (tx, mut rx) = steward_events::channel();
        let exit = run_script(&path, &[], &permissive_policy(), &tx)
            .await
            .unwrap();
        assert_eq!(exit, 0);

        let mut lines = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::ScriptOutput { line } = event {
                lines.push(line);
            }
        }
        assert_eq!(lines, ["first", "second"]);
    }

    #[tokio::test]
    async fn failing_script_emits_framed_output() {
        let temp = tempdir().unwrap();
        let path = write_script(
            temp.path(),
            "fail.sh",
            "#!/bin/sh\necho out-line\necho err-line >&2\nexit 3\n",
            0o700,
        );

        let (tx, mut rx) = steward_events::channel();
        let exit = run_script(&path, &[], &permissive_policy(), &tx)
            .await
            .unwrap();
        assert_eq!(exit, 3);

        let mut errors = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::Error { message } = event {
                errors.push(message);
            }
        }
        let dashes = errors.iter().filter(|m| m.starts_with("----")).count();
        assert_eq!(dashes, 2, "expected dashed separators: {errors:?}");
        assert!(errors.iter().any(|m| m == "err-line"));
        assert!(errors.iter().any(|m| m == "out-line"));
    }

    #[tokio::test]
    async fn script_timeout_kills_the_child() {
        let temp = tempdir().unwrap();
        let path = write_script(temp.path(), "slow.sh", "#!/bin/sh\nsleep 30\n", 0o700);

        let policy = ScriptPolicy {
            timeout: Duration::from_millis(200),
            ..permissive_policy()
        };
        let (tx, _rx) = steward_events::channel();
        let err = run_script(&path, &[], &policy, &tx).await.unwrap_err();
        assert!(matches!(err, Error::Script(ScriptError::Timeout { .. })));
    }

    #[tokio::test]
    async fn embedded_script_materializes_and_runs() {
        let temp = tempdir().unwrap();
        let mut pkginfo = Dictionary::new();
        pkginfo.insert("name".into(), Value::String("ToolX".into()));
        pkginfo.insert(
            "postinstall_script".into(),
            Value::String("#!/bin/sh\necho post done\nexit 0\n".into()),
        );

        let (tx, mut rx) = steward_events::channel();
        let exit = run_embedded_script(
            "postinstall_script",
            &pkginfo,
            temp.path(),
            &permissive_policy(),
            &tx,
        )
        .await
        .unwrap();
        assert_eq!(exit, 0);
        // The materialized file is cleaned up afterwards.
        assert!(!temp.path().join("ToolX.postinstall_script").exists());

        let mut saw_output = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, Event::ScriptOutput { ref line } if line == "post done") {
                saw_output = true;
            }
        }
        assert!(saw_output);
    }

    #[tokio::test]
    async fn missing_embedded_script_field() {
        let temp = tempdir().unwrap();
        let pkginfo = Dictionary::new();
        let (tx, _rx) = steward_events::channel();
        let err = run_embedded_script(
            "preinstall_script",
            &pkginfo,
            temp.path(),
            &permissive_policy(),
            &tx,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Script(ScriptError::MissingScript { .. })
        ));
    }
}
