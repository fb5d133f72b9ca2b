//! Test doubles for the harness collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use rfd_harness::{
    AcceleratorProbe, ArtifactStore, Collaborators, HarnessConfig, HarnessError, HarnessResult, ObjectLocation,
    StatusSink, StatusUpdate, WeightsOrigin, WorkloadRunner,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Shared, ordered record of every collaborator call.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// Object store that writes placeholder files locally and fails on request.
pub struct FakeStore {
    journal: Journal,
    failing: Vec<String>,
    empty_directories: bool,
}

impl FakeStore {
    pub fn new(journal: Journal) -> Self {
        Self { journal, failing: Vec::new(), empty_directories: false }
    }

    /// Any call whose remote location contains one of `needles` fails.
    pub fn failing_on(mut self, needles: &[&str]) -> Self {
        self.failing = needles.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Directory fetches succeed but leave the directory empty.
    pub fn with_empty_directories(mut self) -> Self {
        self.empty_directories = true;
        self
    }

    fn record(&self, entry: String, remote: &ObjectLocation) -> HarnessResult<()> {
        self.journal.lock().unwrap().push(entry);
        let uri = remote.to_string();
        if self.failing.iter().any(|needle| uri.contains(needle.as_str())) {
            return Err(HarnessError::Transfer(format!("NoSuchKey: {uri}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for FakeStore {
    async fn fetch(&self, remote: &ObjectLocation, local: &Path) -> HarnessResult<()> {
        self.record(format!("fetch {remote}"), remote)?;
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(local, "ATOM")?;
        Ok(())
    }

    async fn fetch_directory(&self, remote: &ObjectLocation, local_dir: &Path) -> HarnessResult<()> {
        self.record(format!("fetch_directory {remote}"), remote)?;
        std::fs::create_dir_all(local_dir)?;
        if !self.empty_directories {
            std::fs::write(local_dir.join("fetched.bin"), "data")?;
        }
        Ok(())
    }

    async fn upload(&self, _local: &Path, remote: &ObjectLocation) -> HarnessResult<()> {
        self.record(format!("upload {remote}"), remote)
    }

    async fn upload_directory(&self, _local_dir: &Path, remote: &ObjectLocation, exclude: &[&str]) -> HarnessResult<()> {
        self.record(format!("upload_directory {remote} exclude={}", exclude.join(",")), remote)
    }
}

/// Origin download that records its call and optionally succeeds.
pub struct FakeOrigin {
    journal: Journal,
    succeed: bool,
}

impl FakeOrigin {
    pub fn new(journal: Journal, succeed: bool) -> Self {
        Self { journal, succeed }
    }
}

#[async_trait]
impl WeightsOrigin for FakeOrigin {
    async fn acquire(&self, weights_dir: &Path) -> HarnessResult<()> {
        self.journal.lock().unwrap().push("origin".to_string());
        if !self.succeed {
            return Err(HarnessError::WeightAcquisition("origin unreachable".to_string()));
        }
        std::fs::create_dir_all(weights_dir)?;
        std::fs::write(weights_dir.join("Base_ckpt.pt"), "weights")?;
        Ok(())
    }
}

pub struct FakeProbe {
    pub available: bool,
}

#[async_trait]
impl AcceleratorProbe for FakeProbe {
    async fn detect(&self) -> HarnessResult<Vec<String>> {
        if self.available {
            Ok(vec!["NVIDIA A10G, 23028 MiB".to_string()])
        } else {
            Err(HarnessError::AcceleratorUnavailable("nvidia-smi not runnable".to_string()))
        }
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub updates: Mutex<Vec<StatusUpdate>>,
}

impl RecordingSink {
    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub fn terminal_count(&self) -> usize {
        self.updates().iter().filter(|u| u.is_terminal()).count()
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn deliver(&self, update: &StatusUpdate) -> HarnessResult<()> {
        self.updates.lock().unwrap().push(update.clone());
        Ok(())
    }
}

pub fn collaborators(store: FakeStore, origin: FakeOrigin, gpu: bool) -> Collaborators {
    Collaborators {
        store: Arc::new(store),
        origin: Arc::new(origin),
        probe: Arc::new(FakeProbe { available: gpu }),
        runner: WorkloadRunner::new(),
    }
}

/// Environment for a job whose scratch space lives under `root`.
pub fn job_env(root: &Path, command: &str, extra: &[(&str, &str)]) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("JOB_ID".to_string(), "job-42".to_string());
    env.insert("RFDIFFUSION_COMMAND".to_string(), command.to_string());
    env.insert("INPUT_DIR".to_string(), path(root, "inputs"));
    env.insert("OUTPUT_DIR".to_string(), path(root, "outputs"));
    env.insert("MODEL_DIR".to_string(), path(root, "models"));
    env.insert("WORK_DIR".to_string(), root.display().to_string());
    for (key, value) in extra {
        env.insert((*key).to_string(), (*value).to_string());
    }
    env
}

pub fn config(env: &HashMap<String, String>) -> HarnessConfig {
    HarnessConfig::from_env(env).expect("test configuration is valid")
}

/// Puts a weights file in place so the weights stage is a no-op.
pub fn seed_weights(root: &Path) {
    let dir = root.join("models");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("Base_ckpt.pt"), "weights").unwrap();
}

fn path(root: &Path, name: &str) -> String {
    let p: PathBuf = root.join(name);
    p.display().to_string()
}
