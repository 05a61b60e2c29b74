//! One-shot subprocess execution for CLI tools.
//!
//! Binaries are resolved through [`PathResolver`] and children inherit the
//! resolver's explicit `PATH`.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::error::ProcessError;
use crate::host::path::PathResolver;

/// Default command timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Process Output
// ============================================================================

/// Output from a process execution.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Standard output content.
    pub stdout: String,
    /// Standard error content.
    pub stderr: String,
    /// Exit code (0 = success).
    pub exit_code: i32,
    /// How long the command took.
    pub duration: Duration,
}

impl ProcessOutput {
    /// Returns true if the command exited with 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns stdout on success, otherwise the exit error.
    pub fn stdout_if_success(&self) -> Result<&str, ProcessError> {
        if self.success() {
            Ok(&self.stdout)
        } else {
            Err(ProcessError::NonZeroExit {
                code: self.exit_code,
                stderr: self.stderr.clone(),
            })
        }
    }
}

// ============================================================================
// Process Runner
// ============================================================================

/// Runs CLI tools to completion with a timeout.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    resolver: Arc<PathResolver>,
    timeout: Duration,
}

impl ProcessRunner {
    /// Creates a runner over `resolver`.
    pub fn new(resolver: Arc<PathResolver>) -> Self {
        Self {
            resolver,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Sets the per-command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs `cmd args...` and captures its output.
    #[instrument(skip(self), fields(cmd = %cmd))]
    pub async fn run(&self, cmd: &str, args: &[&str]) -> Result<ProcessOutput, ProcessError> {
        let path = self.resolver.resolve(cmd).ok_or_else(|| {
            warn!(cmd = %cmd, "Command not found");
            ProcessError::NotFound(cmd.to_string())
        })?;

        let start = Instant::now();
        let mut command = Command::new(&path);
        command
            .args(args)
            .env("PATH", self.resolver.search_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(cmd = %cmd, timeout = ?self.timeout, "Command timed out");
                return Err(ProcessError::Timeout(self.timeout));
            }
        };

        let result = ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
        };

        debug!(
            exit_code = result.exit_code,
            duration = ?result.duration,
            stdout_len = result.stdout.len(),
            "Command completed"
        );
        Ok(result)
    }

    /// Returns the first line of `cmd --version`, if the command answers.
    pub async fn version(&self, cmd: &str) -> Option<String> {
        let output = self.run(cmd, &["--version"]).await.ok()?;
        let stdout = output.stdout_if_success().ok()?;
        stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;

    fn script(dir: &Path, name: &str, body: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn runner(dir: &Path) -> ProcessRunner {
        let mut dirs = vec![dir.to_path_buf()];
        dirs.push("/bin".into());
        dirs.push("/usr/bin".into());
        ProcessRunner::new(Arc::new(PathResolver::with_dirs(dirs)))
    }

    #[tokio::test]
    async fn test_missing_command() {
        let dir = tempfile::tempdir().unwrap();
        let err = runner(dir.path()).run("definitely-not-here", &[]).await.unwrap_err();
        assert!(matches!(err, ProcessError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_version_first_line() {
        let dir = tempfile::tempdir().unwrap();
        script(dir.path(), "codex", "echo\necho 'codex-cli 0.46.0'\necho extra");
        assert_eq!(
            runner(dir.path()).version("codex").await.as_deref(),
            Some("codex-cli 0.46.0")
        );
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempfile::tempdir().unwrap();
        script(dir.path(), "slow", "sleep 5");
        let err = runner(dir.path())
            .with_timeout(Duration::from_millis(100))
            .run("slow", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        script(dir.path(), "broken", "echo oops >&2\nexit 3");
        let output = runner(dir.path()).run("broken", &[]).await.unwrap();
        assert!(!output.success());
        assert!(matches!(
            output.stdout_if_success(),
            Err(ProcessError::NonZeroExit { code: 3, .. })
        ));
    }
}
