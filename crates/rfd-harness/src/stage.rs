//! Job lifecycle stages.
//!
//! Stages run strictly in order. Any stage may end in `Failed`; only
//! `ResultsUploaded` may end in `Succeeded`.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Lifecycle stage of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    /// Configuration loaded, nothing staged yet.
    Init,
    /// Model weights are available locally.
    WeightsReady,
    /// All configured inputs are in scratch.
    InputsReady,
    /// The workload subprocess is running.
    Executing,
    /// The workload produced at least one result artifact.
    OutputsVerified,
    /// Results were uploaded, or there was nowhere to upload them.
    ResultsUploaded,
    /// Terminal success.
    Succeeded,
    /// Terminal failure.
    Failed,
}

impl JobStage {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Checks if the job can move from this stage to `to`.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        match (self, to) {
            (Self::Init, Self::WeightsReady)
            | (Self::WeightsReady, Self::InputsReady)
            | (Self::InputsReady, Self::Executing)
            | (Self::Executing, Self::OutputsVerified)
            | (Self::OutputsVerified, Self::ResultsUploaded)
            | (Self::ResultsUploaded, Self::Succeeded) => true,
            (from, Self::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::WeightsReady => "weights_ready",
            Self::InputsReady => "inputs_ready",
            Self::Executing => "executing",
            Self::OutputsVerified => "outputs_verified",
            Self::ResultsUploaded => "results_uploaded",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Tracks the current stage and refuses out-of-order transitions.
#[derive(Debug)]
pub struct StageTracker {
    job_id: String,
    current: JobStage,
    history: Vec<JobStage>,
}

impl StageTracker {
    #[must_use]
    pub fn new(job_id: impl Into<String>) -> Self {
        Self { job_id: job_id.into(), current: JobStage::Init, history: vec![JobStage::Init] }
    }

    #[must_use]
    pub fn current(&self) -> JobStage {
        self.current
    }

    /// Every stage entered so far, starting with `Init`.
    #[must_use]
    pub fn history(&self) -> &[JobStage] {
        &self.history
    }

    /// Moves to `next`. Returns the current stage as the error if the move is illegal.
    pub fn advance(&mut self, next: JobStage) -> Result<JobStage, JobStage> {
        if !self.current.can_transition_to(next) {
            error!(job_id = %self.job_id, from = %self.current, to = %next, "Invalid stage transition");
            return Err(self.current);
        }

        debug!(job_id = %self.job_id, from = %self.current, to = %next, "Stage transition");
        let previous = self.current;
        self.current = next;
        self.history.push(next);
        Ok(previous)
    }
}
