//! Translation of workload log lines into progress updates.
//!
//! A [`LineClassifier`] recognizes workload events in single lines of output;
//! a [`ProgressMapping`] turns those events into [`StatusUpdate`]s. The two are
//! kept apart so another workload tool can plug in its own classifier while
//! reusing the numeric mapping, or vice versa.

use crate::status::StatusUpdate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static STEP_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"step\s+(\d+)").expect("step pattern is valid"));

/// Events a workload can announce through its output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkloadEvent {
    /// A named phase began.
    PhaseStarted { phase: String },
    /// A numbered step finished.
    StepCompleted { step: u64 },
    /// Results are being written.
    SavingStarted,
}

/// Recognizes [`WorkloadEvent`]s in one line of output, without context from other lines.
pub trait LineClassifier: Send + Sync {
    fn classify(&self, line: &str) -> Option<WorkloadEvent>;
}

/// Classifier for RFdiffusion inference output.
///
/// Checks, in order: the IGSO3 initialization banner, `step <n>` anywhere in the
/// line (which includes the inference logger's `Timestep <n>`), then
/// `Saving`/`Writing`. All matches are case-sensitive; the first hit wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct RfdiffusionClassifier;

impl LineClassifier for RfdiffusionClassifier {
    fn classify(&self, line: &str) -> Option<WorkloadEvent> {
        if line.contains("Calculating IGSO3") {
            return Some(WorkloadEvent::PhaseStarted { phase: "Initializing diffusion process".to_string() });
        }

        if let Some(step) = STEP_PATTERN
            .captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
        {
            return Some(WorkloadEvent::StepCompleted { step });
        }

        if line.contains("Saving") || line.contains("Writing") {
            return Some(WorkloadEvent::SavingStarted);
        }

        None
    }
}

/// Numeric mapping from events to progress percentages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMapping {
    /// Progress reported when a phase starts; step progress starts here too.
    pub phase_progress: u8,
    /// Percentage points spread across all steps.
    pub step_span: u8,
    /// Progress reported once results are being written.
    pub saving_progress: u8,
    /// Number of steps the workload is expected to run.
    pub total_steps: u32,
}

impl Default for ProgressMapping {
    fn default() -> Self {
        Self { phase_progress: 40, step_span: 45, saving_progress: 85, total_steps: 50 }
    }
}

impl ProgressMapping {
    #[must_use]
    pub fn with_total_steps(total_steps: u32) -> Self {
        Self { total_steps: total_steps.max(1), ..Self::default() }
    }

    /// `phase + floor(step * span / total)`, capped at the end of the step span.
    #[must_use]
    pub fn step_progress(&self, step: u64) -> u8 {
        let total = u64::from(self.total_steps.max(1));
        let span = u64::from(self.step_span);
        let offset = (step.min(total) * span) / total;
        let progress = u64::from(self.phase_progress) + offset;
        progress.min(99) as u8
    }

    #[must_use]
    pub fn update_for(&self, event: &WorkloadEvent) -> StatusUpdate {
        match event {
            WorkloadEvent::PhaseStarted { phase } => StatusUpdate::running(self.phase_progress, phase.clone()),
            WorkloadEvent::StepCompleted { step } => {
                StatusUpdate::running(self.step_progress(*step), format!("Diffusion step {step}"))
            }
            WorkloadEvent::SavingStarted => StatusUpdate::running(self.saving_progress, "Saving results"),
        }
    }
}

/// Line-at-a-time translator from workload output to status updates.
pub struct ProgressTranslator {
    classifier: Box<dyn LineClassifier>,
    mapping: ProgressMapping,
}

impl std::fmt::Debug for ProgressTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTranslator").field("mapping", &self.mapping).finish_non_exhaustive()
    }
}

impl ProgressTranslator {
    #[must_use]
    pub fn new(classifier: Box<dyn LineClassifier>, mapping: ProgressMapping) -> Self {
        Self { classifier, mapping }
    }

    /// RFdiffusion classifier with the default constants and the given step count.
    #[must_use]
    pub fn rfdiffusion(total_steps: u32) -> Self {
        Self::new(Box::new(RfdiffusionClassifier), ProgressMapping::with_total_steps(total_steps))
    }

    #[must_use]
    pub fn mapping(&self) -> &ProgressMapping {
        &self.mapping
    }

    #[must_use]
    pub fn translate(&self, line: &str) -> Option<StatusUpdate> {
        self.classifier.classify(line).map(|event| self.mapping.update_for(&event))
    }
}
