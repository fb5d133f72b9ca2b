//! Workload subprocess execution.
//!
//! The workload's stderr is folded into stdout inside the shell, so there is a
//! single ordered stream. Each line is appended to the execution log first and
//! then handed to the caller's callback.

use crate::error::{HarnessError, HarnessResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Outcome of one workload run. Read-only once the subprocess has exited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub log_path: PathBuf,
    pub line_count: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionRecord {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Runs shell command lines and tees their output.
///
/// Each workload gets its own process group so that [`WorkloadRunner::terminate`]
/// reaches every process the shell started, not just the shell.
#[derive(Debug, Clone)]
pub struct WorkloadRunner {
    shell: String,
    /// Process group of the running workload, if any.
    active: Arc<Mutex<Option<u32>>>,
}

impl Default for WorkloadRunner {
    fn default() -> Self {
        Self { shell: "sh".to_string(), active: Arc::new(Mutex::new(None)) }
    }
}

impl WorkloadRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `command` in `cwd` and blocks until it exits and its output is drained.
    ///
    /// A non-zero exit is not an error here; the caller decides from the record.
    pub async fn run<F>(
        &self,
        command: &str,
        cwd: &Path,
        log_path: &Path,
        mut on_line: F,
    ) -> HarnessResult<ExecutionRecord>
    where
        F: FnMut(&str) + Send,
    {
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut log = tokio::fs::File::create(log_path).await?;

        let started_at = Utc::now();
        debug!(command = %command, cwd = %cwd.display(), "Spawning workload");
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(format!("exec 2>&1\n{command}"))
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| HarnessError::Execution {
            exit_code: None,
            diagnostic: format!("failed to start workload: {e}"),
        })?;
        self.set_active(child.id());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarnessError::Other(anyhow::anyhow!("workload stdout was not captured")))?;
        let mut reader = BufReader::new(stdout);

        let mut buf = Vec::new();
        let mut line_count = 0_u64;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            if !buf.ends_with(b"\n") {
                buf.push(b'\n');
            }
            log.write_all(&buf).await?;

            let text = String::from_utf8_lossy(&buf);
            let line = text.trim_end_matches(['\n', '\r']);
            info!(target: "workload", "{line}");
            on_line(line);
            line_count += 1;
        }
        log.flush().await?;

        let status = child.wait().await;
        self.set_active(None);
        let status = status?;
        let record = ExecutionRecord {
            exit_code: status.code(),
            log_path: log_path.to_path_buf(),
            line_count,
            started_at,
            finished_at: Utc::now(),
        };
        debug!(exit_code = ?record.exit_code, lines = line_count, "Workload exited");
        Ok(record)
    }

    fn set_active(&self, pgid: Option<u32>) {
        if let Ok(mut active) = self.active.lock() {
            *active = pgid;
        }
    }

    /// Sends SIGTERM to the process group of the running workload.
    ///
    /// Returns false when no workload is running or the signal could not be sent.
    pub async fn terminate(&self) -> bool {
        let Some(pgid) = self.active.lock().ok().and_then(|mut active| active.take()) else {
            return false;
        };

        warn!(pgid, "Terminating workload process group");
        match Command::new("kill").args(["-TERM", "--", &format!("-{pgid}")]).status().await {
            Ok(status) => status.success(),
            Err(e) => {
                warn!(pgid, error = %e, "Failed to signal workload");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_tees_stdout_and_stderr_in_order() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("logs").join("run.log");
        let mut seen = Vec::new();

        let record = WorkloadRunner::new()
            .run("echo one; echo two >&2; printf three", temp.path(), &log, |line| seen.push(line.to_string()))
            .await
            .unwrap();

        assert!(record.succeeded());
        assert_eq!(record.line_count, 3);
        assert_eq!(seen, vec!["one", "two", "three"]);
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "one\ntwo\nthree\n");
        assert!(record.elapsed() >= chrono::Duration::zero());
    }

    #[tokio::test]
    async fn test_run_reports_exit_code() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("run.log");

        let record = WorkloadRunner::new()
            .run("echo 'Error: disk full'; exit 3", temp.path(), &log, |_| {})
            .await
            .unwrap();

        assert!(!record.succeeded());
        assert_eq!(record.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_missing_working_directory_fails_to_start() {
        let temp = TempDir::new().unwrap();
        let err = WorkloadRunner::new()
            .run("true", &temp.path().join("nope"), &temp.path().join("run.log"), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Execution { exit_code: None, .. }));
    }

    #[tokio::test]
    async fn test_terminate_stops_whole_process_group() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("run.log");
        let runner = WorkloadRunner::new();
        assert!(!runner.terminate().await);

        let background = runner.clone();
        let killer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            background.terminate().await
        });

        let started = std::time::Instant::now();
        let record = runner
            .run("sleep 5; echo late > late.txt", temp.path(), &log, |_| {})
            .await
            .unwrap();

        assert!(killer.await.unwrap());
        assert!(!record.succeeded());
        assert!(started.elapsed() < std::time::Duration::from_secs(4));
        assert!(!temp.path().join("late.txt").exists());
    }
}
