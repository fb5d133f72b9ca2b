//! RFdiffusion job harness
//!
//! Lifecycle driver for a containerized GPU design job:
//! - Acquiring model weights (cache first, origin download as fallback)
//! - Staging inputs from and results to the object store
//! - Running the workload and translating its log output into progress
//! - Best-effort status reporting to the control plane
//! - Exactly one terminal status and guaranteed scratch cleanup per run

pub mod accelerator;
pub mod classifier;
pub mod config;
pub mod error;
pub mod executor;
pub mod failure;
pub mod job;
pub mod layout;
pub mod orchestrator;
pub mod reporter;
pub mod stage;
pub mod stager;
pub mod status;

pub use accelerator::{AcceleratorProbe, NvidiaSmiProbe};
pub use classifier::{LineClassifier, ProgressMapping, ProgressTranslator, RfdiffusionClassifier, WorkloadEvent};
pub use config::{EnvSource, FailureProgress, HarnessConfig, ProcessEnv, StatusEndpointConfig, StorageConfig, WorkloadConfig};
pub use error::{HarnessError, HarnessResult};
pub use executor::{ExecutionRecord, WorkloadRunner};
pub use failure::{extract_diagnostic, FailureHandler};
pub use job::{InputKind, InputReferences, JobDescriptor, JobId};
pub use layout::{ScratchGuard, ScratchLayout};
pub use orchestrator::{fail_before_start, Collaborators, JobDriver, JobOutcome, JobReport};
pub use reporter::{sink_for, ConsoleSink, HttpStatusSink, StatusReporter, StatusSink};
pub use stage::{JobStage, StageTracker};
pub use stager::{ArtifactStore, AwsCliStore, ObjectLocation, ScriptOrigin, WeightsOrigin, WeightsProvisioner, WeightsSource};
pub use status::{JobState, StatusUpdate};
