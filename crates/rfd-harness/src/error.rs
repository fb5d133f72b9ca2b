use std::path::PathBuf;
use thiserror::Error;

pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

/// Every fatal condition a job can hit, plus the wrappers the components need.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to acquire model weights: {0}")]
    WeightAcquisition(String),

    #[error("failed to download input {object}: {reason}")]
    InputAcquisition { object: String, reason: String },

    #[error("no GPU available: {0}")]
    AcceleratorUnavailable(String),

    #[error("RFdiffusion failed (exit code {}): {diagnostic}", exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    Execution { exit_code: Option<i32>, diagnostic: String },

    #[error("no .{extension} files generated in {}", dir.display())]
    NoOutputs { extension: String, dir: PathBuf },

    #[error("failed to upload results: {0}")]
    ResultUpload(String),

    /// The driver received a shutdown signal while the job was in flight.
    #[error("job interrupted by {signal}")]
    Interrupted { signal: String, exit_code: i32 },

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("status delivery failed: {0}")]
    StatusDelivery(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HarnessError {
    /// Process exit code for this failure.
    ///
    /// A failed workload propagates its own exit code; everything else exits 1.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Execution { exit_code: Some(code), .. } if *code != 0 => (*code).clamp(1, 255),
            Self::Interrupted { exit_code, .. } => (*exit_code).clamp(1, 255),
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_propagates_exit_code() {
        let err = HarnessError::Execution { exit_code: Some(137), diagnostic: "killed".to_string() };
        assert_eq!(err.exit_code(), 137);
        assert!(err.to_string().contains("exit code 137"));
    }

    #[test]
    fn test_other_errors_exit_one() {
        assert_eq!(HarnessError::Configuration("JOB_ID is required".to_string()).exit_code(), 1);
        let signalled = HarnessError::Execution { exit_code: None, diagnostic: "terminated".to_string() };
        assert_eq!(signalled.exit_code(), 1);
        assert!(signalled.to_string().contains("signal"));
    }

    #[test]
    fn test_exit_code_is_clamped_to_process_range() {
        let err = HarnessError::Execution { exit_code: Some(300), diagnostic: "x".to_string() };
        assert_eq!(err.exit_code(), 255);
        let err = HarnessError::Execution { exit_code: Some(-9), diagnostic: "x".to_string() };
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_interrupted_uses_signal_exit_code() {
        let err = HarnessError::Interrupted { signal: "SIGTERM".to_string(), exit_code: 143 };
        assert_eq!(err.exit_code(), 143);
        assert_eq!(err.to_string(), "job interrupted by SIGTERM");
    }
}
