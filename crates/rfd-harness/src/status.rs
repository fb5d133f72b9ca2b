use serde::{Deserialize, Serialize};

/// Job state as understood by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One status report. Serializes to the control-plane request body
/// `{"status": ..., "progress": ..., "message": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(rename = "status")]
    pub state: JobState,
    pub progress: u8,
    pub message: String,
}

impl StatusUpdate {
    #[must_use]
    pub fn running(progress: u8, message: impl Into<String>) -> Self {
        Self { state: JobState::Running, progress: progress.min(100), message: message.into() }
    }

    #[must_use]
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self { state: JobState::Succeeded, progress: 100, message: message.into() }
    }

    #[must_use]
    pub fn failed(progress: u8, message: impl Into<String>) -> Self {
        Self { state: JobState::Failed, progress: progress.min(100), message: message.into() }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_update_wire_format() {
        let update = StatusUpdate::running(49, "Diffusion step 10");
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value, json!({"status": "RUNNING", "progress": 49, "message": "Diffusion step 10"}));
    }

    #[test]
    fn test_succeeded_is_full_progress() {
        let update = StatusUpdate::succeeded("Generated 3 designs");
        assert_eq!(update.progress, 100);
        assert!(update.is_terminal());
        assert!(!StatusUpdate::running(10, "x").is_terminal());
    }
}
