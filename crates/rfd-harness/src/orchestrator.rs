//! Job orchestration.
//!
//! [`JobDriver`] walks a job through its stages in order: weights, inputs,
//! execution, output verification and upload. Whatever happens, exactly one
//! terminal status update is sent and scratch space is cleaned up once.

use crate::accelerator::{AcceleratorProbe, NvidiaSmiProbe};
use crate::classifier::ProgressTranslator;
use crate::config::{FailureProgress, HarnessConfig};
use crate::error::{HarnessError, HarnessResult};
use crate::executor::{ExecutionRecord, WorkloadRunner};
use crate::failure::{execution_diagnostic, FailureHandler};
use crate::layout::{ScratchGuard, EXECUTION_LOG_NAME};
use crate::reporter::StatusReporter;
use crate::stage::{JobStage, StageTracker};
use crate::stager::{stage_inputs, ArtifactStore, AwsCliStore, ScriptOrigin, WeightsOrigin, WeightsProvisioner, WeightsSource};
use crate::status::StatusUpdate;
use serde::Serialize;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Output files never uploaded with the results.
pub const UPLOAD_EXCLUDES: &[&str] = &["*.log", "*.tmp"];

/// External collaborators the driver talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ArtifactStore>,
    pub origin: Arc<dyn WeightsOrigin>,
    pub probe: Arc<dyn AcceleratorProbe>,
    pub runner: WorkloadRunner,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").field("runner", &self.runner).finish_non_exhaustive()
    }
}

impl Collaborators {
    /// `aws` CLI, the weights download script, `nvidia-smi` and `sh`.
    #[must_use]
    pub fn production(config: &HarnessConfig) -> Self {
        Self {
            store: Arc::new(AwsCliStore::new()),
            origin: Arc::new(ScriptOrigin::new(config.workload.weights_script.clone())),
            probe: Arc::new(NvidiaSmiProbe::new()),
            runner: WorkloadRunner::new(),
        }
    }
}

/// What a successful run produced.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    /// Result artifacts with the expected extension.
    pub artifacts: usize,
    pub weights: WeightsSource,
    pub execution: ExecutionRecord,
    /// Whether results went to the object store.
    pub uploaded: bool,
    /// Whether the execution log went with them.
    pub log_uploaded: bool,
}

/// Final account of a run.
#[derive(Debug)]
pub struct JobReport {
    pub outcome: Result<JobOutcome, HarnessError>,
    /// The single terminal update that was sent.
    pub terminal: StatusUpdate,
    /// Stages entered, in order.
    pub stages: Vec<JobStage>,
}

impl JobReport {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match &self.outcome {
            Ok(_) => 0,
            Err(e) => e.exit_code(),
        }
    }
}

/// Reports a job that could not even be configured. No stage is attempted.
pub async fn fail_before_start(err: HarnessError, reporter: StatusReporter) -> JobReport {
    let terminal = FailureHandler::new(FailureProgress::LastKnown).terminal_update(&err, reporter.last_progress());
    reporter.finish(terminal.clone()).await;
    JobReport { outcome: Err(err), terminal, stages: vec![JobStage::Init, JobStage::Failed] }
}

/// Runs one job end to end.
pub struct JobDriver {
    config: HarnessConfig,
    deps: Collaborators,
    translator: ProgressTranslator,
}

impl std::fmt::Debug for JobDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDriver").field("job_id", &self.config.job.job_id).finish_non_exhaustive()
    }
}

impl JobDriver {
    #[must_use]
    pub fn new(config: HarnessConfig, deps: Collaborators) -> Self {
        let translator = ProgressTranslator::rfdiffusion(config.workload.total_steps);
        Self { config, deps, translator }
    }

    /// Replaces the default RFdiffusion translator.
    #[must_use]
    pub fn with_translator(mut self, translator: ProgressTranslator) -> Self {
        self.translator = translator;
        self
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Runs every stage, sends the terminal update and cleans up scratch space.
    pub async fn run(self, reporter: StatusReporter) -> JobReport {
        self.run_until(reporter, std::future::pending()).await
    }

    /// Like [`Self::run`], but abandons the job as soon as `shutdown` resolves.
    ///
    /// The error `shutdown` yields becomes the job's failure: the workload's
    /// process group is terminated, the FAILED update is sent and scratch space
    /// is cleaned up, exactly as for any other fatal error.
    pub async fn run_until<S>(self, reporter: StatusReporter, shutdown: S) -> JobReport
    where
        S: Future<Output = HarnessError>,
    {
        let job_id = self.config.job.job_id.clone();
        info!(job_id = %job_id, "Starting job");

        let guard = ScratchGuard::new(self.config.layout.clone());
        let mut tracker = StageTracker::new(job_id.0.clone());

        let interrupted = {
            let stages = self.run_stages(&reporter, &mut tracker);
            tokio::select! {
                outcome = stages => Ok(outcome),
                err = shutdown => Err(err),
            }
        };
        let outcome = match interrupted {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "Shutdown requested, abandoning job");
                self.deps.runner.terminate().await;
                Err(err)
            }
        };
        let terminal = match &outcome {
            Ok(done) => {
                let _ = tracker.advance(JobStage::Succeeded);
                info!(job_id = %job_id, artifacts = done.artifacts, "Job completed");
                StatusUpdate::succeeded(format!("Generated {} designs", done.artifacts))
            }
            Err(e) => {
                let _ = tracker.advance(JobStage::Failed);
                FailureHandler::new(self.config.workload.failure_progress)
                    .terminal_update(e, reporter.last_progress())
            }
        };

        reporter.finish(terminal.clone()).await;
        guard.cleanup();

        JobReport { outcome, terminal, stages: tracker.history().to_vec() }
    }

    async fn run_stages(
        &self,
        reporter: &StatusReporter,
        tracker: &mut StageTracker,
    ) -> HarnessResult<JobOutcome> {
        let layout = &self.config.layout;
        let workload = &self.config.workload;
        layout.ensure_dirs()?;

        reporter.report(StatusUpdate::running(5, "Checking model weights"));
        let weights = WeightsProvisioner::new(
            self.deps.store.as_ref(),
            self.deps.origin.as_ref(),
            self.config.storage.weights_cache.as_ref(),
        )
        .ensure(&layout.weights_dir)
        .await?;
        advance(tracker, JobStage::WeightsReady)?;

        if !self.config.job.inputs.is_empty() {
            reporter.report(StatusUpdate::running(20, "Downloading inputs"));
        }
        stage_inputs(self.deps.store.as_ref(), &self.config.job.inputs, layout).await?;
        advance(tracker, JobStage::InputsReady)?;

        if workload.require_gpu {
            let devices = self.deps.probe.detect().await?;
            info!(devices = ?devices, "GPU available");
        } else {
            warn!("GPU check disabled, running without accelerator verification");
        }
        advance(tracker, JobStage::Executing)?;

        reporter.report(StatusUpdate::running(30, "Running RFdiffusion"));
        let log_path = layout.log_path();
        let translator = &self.translator;
        let execution = self
            .deps
            .runner
            .run(&workload.command, &layout.work_dir, &log_path, |line| {
                if let Some(update) = translator.translate(line) {
                    reporter.report(update);
                }
            })
            .await?;

        if !execution.succeeded() {
            let diagnostic = execution_diagnostic(&log_path, workload.diagnostic_tail_lines, execution.exit_code);
            return Err(HarnessError::Execution { exit_code: execution.exit_code, diagnostic });
        }
        info!(elapsed_secs = execution.elapsed().num_seconds(), lines = execution.line_count, "RFdiffusion finished");

        let artifacts = count_artifacts(&layout.outputs_dir, &workload.output_extension);
        if artifacts == 0 {
            return Err(HarnessError::NoOutputs {
                extension: workload.output_extension.clone(),
                dir: layout.outputs_dir.clone(),
            });
        }
        info!(artifacts, extension = %workload.output_extension, "Outputs verified");
        advance(tracker, JobStage::OutputsVerified)?;

        let (uploaded, log_uploaded) = match &self.config.job.output_prefix {
            Some(prefix) => {
                reporter.report(StatusUpdate::running(90, "Uploading results"));
                info!(to = %prefix, "Uploading results");
                self.deps
                    .store
                    .upload_directory(&layout.outputs_dir, prefix, UPLOAD_EXCLUDES)
                    .await
                    .map_err(|e| HarnessError::ResultUpload(e.to_string()))?;

                let log_remote = prefix.join("logs").join(EXECUTION_LOG_NAME);
                let log_uploaded = match self.deps.store.upload(&log_path, &log_remote).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "Failed to upload execution log");
                        false
                    }
                };
                (true, log_uploaded)
            }
            None => {
                info!("No OUTPUT_S3_PREFIX configured, keeping results local");
                (false, false)
            }
        };
        advance(tracker, JobStage::ResultsUploaded)?;

        Ok(JobOutcome { artifacts, weights, execution, uploaded, log_uploaded })
    }
}

fn advance(tracker: &mut StageTracker, next: JobStage) -> HarnessResult<()> {
    tracker.advance(next).map(|_| ()).map_err(|current| {
        HarnessError::Other(anyhow::anyhow!("invalid stage transition from {current} to {next}"))
    })
}

/// Files directly under `dir` with the given extension.
#[must_use]
pub fn count_artifacts(dir: &Path, extension: &str) -> usize {
    walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some(extension))
        .count()
}
