use crate::config::FailureProgress;
use crate::error::HarnessError;
use crate::status::StatusUpdate;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::error;

/// Bytes read per backwards step when looking for the log tail.
const TAIL_CHUNK: u64 = 64 * 1024;

/// Last line among the final `tail_lines` lines of `log` that mentions an error
/// (case-insensitive), trimmed. `None` when nothing matches or the log is unreadable.
#[must_use]
pub fn extract_diagnostic(log: &Path, tail_lines: usize) -> Option<String> {
    let tail = read_tail(log, tail_lines, TAIL_CHUNK).ok()?;
    let lines: Vec<&str> = tail.lines().collect();
    let start = lines.len().saturating_sub(tail_lines);

    lines[start..]
        .iter()
        .rev()
        .find(|line| line.to_lowercase().contains("error"))
        .map(|line| line.trim().to_string())
}

/// Reads backwards from the end of `path` until it holds more than `lines`
/// line breaks or reaches the start of the file.
fn read_tail(path: &Path, lines: usize, chunk: u64) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut pos = file.metadata()?.len();
    let mut tail: Vec<u8> = Vec::new();

    while pos > 0 && tail.iter().filter(|b| **b == b'\n').count() <= lines {
        let step = chunk.min(pos);
        pos -= step;
        file.seek(SeekFrom::Start(pos))?;

        let mut buf = vec![0; step as usize];
        file.read_exact(&mut buf)?;
        buf.extend_from_slice(&tail);
        tail = buf;
    }

    Ok(String::from_utf8_lossy(&tail).into_owned())
}

/// Diagnostic for a workload that exited abnormally, with a generic fallback.
#[must_use]
pub fn execution_diagnostic(log: &Path, tail_lines: usize, exit_code: Option<i32>) -> String {
    extract_diagnostic(log, tail_lines).unwrap_or_else(|| match exit_code {
        Some(code) => format!("RFdiffusion exited with code {code}"),
        None => "RFdiffusion was terminated by a signal".to_string(),
    })
}

/// Turns the first fatal condition of a run into its terminal FAILED update.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureHandler {
    progress: FailureProgress,
}

impl FailureHandler {
    #[must_use]
    pub fn new(progress: FailureProgress) -> Self {
        Self { progress }
    }

    /// Writes the failure to the error stream and builds the FAILED update.
    #[must_use]
    pub fn terminal_update(&self, err: &HarnessError, last_progress: u8) -> StatusUpdate {
        let message = err.to_string();
        error!(exit_code = err.exit_code(), "{message}");

        let progress = match self.progress {
            FailureProgress::LastKnown => last_progress,
            FailureProgress::Zero => 0,
        };
        StatusUpdate::failed(progress, message)
    }
}
