//! Job configuration.
//!
//! The container receives its whole job through environment variables. They are
//! read once here, validated, and handed around as [`HarnessConfig`].

use crate::error::{HarnessError, HarnessResult};
use crate::job::{InputReferences, JobDescriptor, JobId};
use crate::layout::ScratchLayout;
use crate::stager::ObjectLocation;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TOTAL_STEPS: u32 = 50;
pub const DEFAULT_STATUS_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DIAGNOSTIC_TAIL_LINES: usize = 50;
pub const DEFAULT_WEIGHTS_SCRIPT: &str = "/app/RFdiffusion/scripts/download_models.sh";

static DIFFUSER_T: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"diffuser\.T=(\d+)").expect("diffuser.T pattern is valid"));

/// Source of configuration variables.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl EnvSource for HashMap<&str, &str> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| (*v).to_string())
    }
}

/// Value of `key`, with blank values treated as absent.
fn non_blank(env: &dyn EnvSource, key: &str) -> Option<String> {
    env.var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(env: &dyn EnvSource, key: &str) -> HarnessResult<Option<T>> {
    non_blank(env, key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| HarnessError::Configuration(format!("{key} must be a number, got '{raw}'")))
        })
        .transpose()
}

fn parse_bool(env: &dyn EnvSource, key: &str, default: bool) -> HarnessResult<bool> {
    match non_blank(env, key) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(HarnessError::Configuration(format!("{key} must be true or false, got '{raw}'"))),
        },
    }
}

fn redact<S: Serializer>(token: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    match token {
        Some(_) => serializer.serialize_some("***"),
        None => serializer.serialize_none(),
    }
}

/// Control-plane destination for status updates.
///
/// Loadable even when the rest of the configuration is invalid, so that a
/// configuration failure can still be reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEndpointConfig {
    pub endpoint: Option<String>,
    #[serde(serialize_with = "redact")]
    pub token: Option<String>,
    pub job_id: Option<JobId>,
    pub timeout: Duration,
}

impl Default for StatusEndpointConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: None,
            job_id: None,
            timeout: Duration::from_secs(DEFAULT_STATUS_TIMEOUT_SECS),
        }
    }
}

impl StatusEndpointConfig {
    /// Never fails: a bad timeout falls back to the default.
    pub fn from_env(env: &dyn EnvSource) -> Self {
        let timeout = parse_number::<u64>(env, "STATUS_TIMEOUT_SECS")
            .ok()
            .flatten()
            .unwrap_or(DEFAULT_STATUS_TIMEOUT_SECS);
        Self {
            endpoint: non_blank(env, "API_ENDPOINT").map(|e| e.trim_end_matches('/').to_string()),
            token: non_blank(env, "API_TOKEN"),
            job_id: non_blank(env, "JOB_ID").map(JobId),
            timeout: Duration::from_secs(timeout),
        }
    }

    /// `{endpoint}/internal/jobs/{job_id}/status`, when both parts are configured.
    #[must_use]
    pub fn status_url(&self) -> Option<String> {
        match (&self.endpoint, &self.job_id) {
            (Some(endpoint), Some(job_id)) => Some(format!("{endpoint}/internal/jobs/{job_id}/status")),
            _ => None,
        }
    }
}

/// Object-store settings not tied to a single input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Cache prefix holding pre-downloaded model weights.
    pub weights_cache: Option<ObjectLocation>,
}

/// Which progress a failure report carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureProgress {
    /// The last progress reported before the failure.
    #[default]
    LastKnown,
    /// Always 0, as older drivers did.
    Zero,
}

/// Settings for the workload subprocess and how its results are judged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    pub command: String,
    pub total_steps: u32,
    /// Extension (without dot) of the artifacts the workload must produce.
    pub output_extension: String,
    pub require_gpu: bool,
    pub weights_script: PathBuf,
    pub diagnostic_tail_lines: usize,
    pub failure_progress: FailureProgress,
}

impl WorkloadConfig {
    /// Workload settings with defaults for everything but the command.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        let command = command.into();
        let total_steps = steps_from_command(&command).unwrap_or(DEFAULT_TOTAL_STEPS);
        Self {
            command,
            total_steps,
            output_extension: "pdb".to_string(),
            require_gpu: true,
            weights_script: PathBuf::from(DEFAULT_WEIGHTS_SCRIPT),
            diagnostic_tail_lines: DEFAULT_DIAGNOSTIC_TAIL_LINES,
            failure_progress: FailureProgress::LastKnown,
        }
    }
}

/// Number of diffusion steps requested through a `diffuser.T=<n>` override.
#[must_use]
pub fn steps_from_command(command: &str) -> Option<u32> {
    DIFFUSER_T
        .captures(command)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|n| *n > 0)
}

/// Complete, validated configuration for one job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub job: JobDescriptor,
    pub status: StatusEndpointConfig,
    pub storage: StorageConfig,
    pub layout: ScratchLayout,
    pub workload: WorkloadConfig,
}

impl HarnessConfig {
    /// Reads and validates the whole configuration.
    pub fn from_env(env: &dyn EnvSource) -> HarnessResult<Self> {
        let job_id = non_blank(env, "JOB_ID")
            .ok_or_else(|| HarnessError::Configuration("JOB_ID is required".to_string()))?;
        let command = non_blank(env, "RFDIFFUSION_COMMAND")
            .ok_or_else(|| HarnessError::Configuration("RFDIFFUSION_COMMAND is required".to_string()))?;

        let input_bucket = non_blank(env, "INPUT_S3_BUCKET");
        let in_input_bucket = |key: &str| -> HarnessResult<Option<ObjectLocation>> {
            match (non_blank(env, key), &input_bucket) {
                (None, _) => Ok(None),
                (Some(k), Some(bucket)) => Ok(Some(ObjectLocation::new(bucket.clone(), k))),
                (Some(_), None) => {
                    Err(HarnessError::Configuration(format!("{key} is set but INPUT_S3_BUCKET is not")))
                }
            }
        };

        let inputs = InputReferences {
            primary: in_input_bucket("INPUT_PDB_KEY")?,
            target: in_input_bucket("TARGET_PDB_KEY")?,
            scaffolds: in_input_bucket("SCAFFOLD_S3_PREFIX")?,
        };
        let output_prefix = in_input_bucket("OUTPUT_S3_PREFIX")?;

        let weights_cache = non_blank(env, "MODEL_S3_BUCKET").map(|bucket| {
            let prefix = non_blank(env, "MODEL_S3_PREFIX").unwrap_or_else(|| "models".to_string());
            ObjectLocation::new(bucket, prefix)
        });

        let defaults = ScratchLayout::default();
        let layout = ScratchLayout {
            inputs_dir: non_blank(env, "INPUT_DIR").map_or(defaults.inputs_dir, PathBuf::from),
            outputs_dir: non_blank(env, "OUTPUT_DIR").map_or(defaults.outputs_dir, PathBuf::from),
            weights_dir: non_blank(env, "MODEL_DIR").map_or(defaults.weights_dir, PathBuf::from),
            work_dir: non_blank(env, "WORK_DIR").map_or(defaults.work_dir, PathBuf::from),
        };

        let mut workload = WorkloadConfig::new(command.clone());
        if let Some(steps) = parse_number::<u32>(env, "DIFFUSION_STEPS")? {
            if steps == 0 {
                return Err(HarnessError::Configuration("DIFFUSION_STEPS must be at least 1".to_string()));
            }
            workload.total_steps = steps;
        }
        if let Some(ext) = non_blank(env, "OUTPUT_EXTENSION") {
            workload.output_extension = ext.trim_start_matches('.').to_string();
        }
        workload.require_gpu = parse_bool(env, "REQUIRE_GPU", true)?;
        if let Some(script) = non_blank(env, "WEIGHTS_DOWNLOAD_SCRIPT") {
            workload.weights_script = PathBuf::from(script);
        }
        if let Some(lines) = parse_number::<usize>(env, "DIAGNOSTIC_TAIL_LINES")? {
            workload.diagnostic_tail_lines = lines.max(1);
        }
        workload.failure_progress = match non_blank(env, "FAILURE_PROGRESS").as_deref() {
            None | Some("last") => FailureProgress::LastKnown,
            Some("zero") => FailureProgress::Zero,
            Some(other) => {
                return Err(HarnessError::Configuration(format!(
                    "FAILURE_PROGRESS must be 'last' or 'zero', got '{other}'"
                )))
            }
        };

        Ok(Self {
            job: JobDescriptor { job_id: JobId(job_id), command, inputs, output_prefix },
            status: StatusEndpointConfig::from_env(env),
            storage: StorageConfig { weights_cache },
            layout,
            workload,
        })
    }

    /// Status endpoint plus the full configuration, which may have failed validation.
    pub fn load(env: &dyn EnvSource) -> (StatusEndpointConfig, HarnessResult<Self>) {
        (StatusEndpointConfig::from_env(env), Self::from_env(env))
    }
}
