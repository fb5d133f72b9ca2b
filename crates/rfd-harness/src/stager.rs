//! Artifact staging between local scratch and the object store.
//!
//! [`ArtifactStore`] is the narrow transfer contract; [`AwsCliStore`] backs it
//! with the `aws s3` CLI available in the container. Weights follow a
//! cache-first policy with a single fallback to an origin download
//! ([`WeightsProvisioner`]); inputs are fetched one class at a time
//! ([`stage_inputs`]).

use crate::error::{HarnessError, HarnessResult};
use crate::job::{InputKind, InputReferences};
use crate::layout::{dir_has_entries, ScratchLayout};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Location of an object (or prefix) in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    #[must_use]
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self { bucket: bucket.into(), key: key.into().trim_start_matches('/').to_string() }
    }

    /// Parses `s3://bucket/key`.
    pub fn parse(uri: &str) -> HarnessResult<Self> {
        let rest = uri
            .strip_prefix("s3://")
            .ok_or_else(|| HarnessError::Configuration(format!("not an s3:// location: {uri}")))?;
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(HarnessError::Configuration(format!("missing bucket in {uri}")));
        }
        Ok(Self::new(bucket, key))
    }

    /// Appends a path segment to the key.
    #[must_use]
    pub fn join(&self, segment: &str) -> Self {
        let segment = segment.trim_start_matches('/');
        let key = if self.key.is_empty() {
            segment.to_string()
        } else {
            format!("{}/{}", self.key.trim_end_matches('/'), segment)
        };
        Self { bucket: self.bucket.clone(), key }
    }
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Transfers between the object store and local scratch.
///
/// Every call is attempted once; retries belong to the caller's policy.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn fetch(&self, remote: &ObjectLocation, local: &Path) -> HarnessResult<()>;

    async fn fetch_directory(&self, remote: &ObjectLocation, local_dir: &Path) -> HarnessResult<()>;

    async fn upload(&self, local: &Path, remote: &ObjectLocation) -> HarnessResult<()>;

    async fn upload_directory(
        &self,
        local_dir: &Path,
        remote: &ObjectLocation,
        exclude: &[&str],
    ) -> HarnessResult<()>;
}

/// [`ArtifactStore`] backed by the `aws` CLI.
#[derive(Debug, Clone)]
pub struct AwsCliStore {
    program: String,
}

impl Default for AwsCliStore {
    fn default() -> Self {
        Self { program: "aws".to_string() }
    }
}

impl AwsCliStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a different executable, e.g. an absolute path to the CLI.
    #[must_use]
    pub fn with_program(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    async fn s3(&self, args: Vec<String>) -> HarnessResult<()> {
        debug!(program = %self.program, args = ?args, "Running object store transfer");
        let output = Command::new(&self.program)
            .arg("s3")
            .args(&args)
            .arg("--only-show-errors")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| HarnessError::Transfer(format!("failed to launch {}: {}", self.program, e)))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(HarnessError::Transfer(format!(
            "{} s3 {} exited with {}: {}",
            self.program,
            args.first().map_or("", String::as_str),
            output.status,
            stderr.trim()
        )))
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

fn prefix_arg(remote: &ObjectLocation) -> String {
    let uri = remote.to_string();
    if uri.ends_with('/') { uri } else { format!("{uri}/") }
}

#[async_trait]
impl ArtifactStore for AwsCliStore {
    async fn fetch(&self, remote: &ObjectLocation, local: &Path) -> HarnessResult<()> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.s3(vec!["cp".to_string(), remote.to_string(), path_arg(local)]).await
    }

    async fn fetch_directory(&self, remote: &ObjectLocation, local_dir: &Path) -> HarnessResult<()> {
        tokio::fs::create_dir_all(local_dir).await?;
        self.s3(vec!["sync".to_string(), prefix_arg(remote), path_arg(local_dir)]).await
    }

    async fn upload(&self, local: &Path, remote: &ObjectLocation) -> HarnessResult<()> {
        self.s3(vec!["cp".to_string(), path_arg(local), remote.to_string()]).await
    }

    async fn upload_directory(
        &self,
        local_dir: &Path,
        remote: &ObjectLocation,
        exclude: &[&str],
    ) -> HarnessResult<()> {
        let mut args =
            vec!["cp".to_string(), path_arg(local_dir), prefix_arg(remote), "--recursive".to_string()];
        for pattern in exclude {
            args.push("--exclude".to_string());
            args.push((*pattern).to_string());
        }
        self.s3(args).await
    }
}

/// Canonical source of model weights, used when the cache cannot serve them.
#[async_trait]
pub trait WeightsOrigin: Send + Sync {
    async fn acquire(&self, weights_dir: &Path) -> HarnessResult<()>;
}

/// Runs the workload's own download script with the weights directory as argument.
#[derive(Debug, Clone)]
pub struct ScriptOrigin {
    script: PathBuf,
}

impl ScriptOrigin {
    #[must_use]
    pub fn new(script: PathBuf) -> Self {
        Self { script }
    }
}

#[async_trait]
impl WeightsOrigin for ScriptOrigin {
    async fn acquire(&self, weights_dir: &Path) -> HarnessResult<()> {
        if !self.script.exists() {
            return Err(HarnessError::WeightAcquisition(format!(
                "download script not found: {}",
                self.script.display()
            )));
        }

        tokio::fs::create_dir_all(weights_dir).await?;
        let status = Command::new("bash").arg(&self.script).arg(weights_dir).kill_on_drop(true).status().await?;
        if !status.success() {
            return Err(HarnessError::WeightAcquisition(format!(
                "{} exited with {}",
                self.script.display(),
                status
            )));
        }
        Ok(())
    }
}

/// Where the weights came from on this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightsSource {
    AlreadyPresent,
    Cache,
    Origin,
}

/// Cache-then-origin acquisition of model weights.
pub struct WeightsProvisioner<'a> {
    store: &'a dyn ArtifactStore,
    origin: &'a dyn WeightsOrigin,
    cache: Option<&'a ObjectLocation>,
}

impl<'a> WeightsProvisioner<'a> {
    #[must_use]
    pub fn new(
        store: &'a dyn ArtifactStore,
        origin: &'a dyn WeightsOrigin,
        cache: Option<&'a ObjectLocation>,
    ) -> Self {
        Self { store, origin, cache }
    }

    /// Makes sure `weights_dir` is populated.
    ///
    /// A non-empty directory is taken as-is. Otherwise the cache (if configured)
    /// is tried once, then the origin once; the first success wins.
    pub async fn ensure(&self, weights_dir: &Path) -> HarnessResult<WeightsSource> {
        if dir_has_entries(weights_dir) {
            info!(dir = %weights_dir.display(), "Model weights already present");
            return Ok(WeightsSource::AlreadyPresent);
        }

        let mut cache_failure = None;
        if let Some(cache) = self.cache {
            info!(cache = %cache, "Fetching model weights from cache");
            match self.store.fetch_directory(cache, weights_dir).await {
                Ok(()) if dir_has_entries(weights_dir) => return Ok(WeightsSource::Cache),
                Ok(()) => cache_failure = Some(format!("{cache} contained no weights")),
                Err(e) => cache_failure = Some(e.to_string()),
            }
            if let Some(reason) = &cache_failure {
                warn!(reason = %reason, "Weights cache unavailable, falling back to origin download");
            }
        }

        info!("Downloading model weights from origin");
        match self.origin.acquire(weights_dir).await {
            Ok(()) => Ok(WeightsSource::Origin),
            Err(e) => {
                let reason = match cache_failure {
                    Some(cache) => format!("cache: {cache}; origin: {e}"),
                    None => format!("origin: {e}"),
                };
                Err(HarnessError::WeightAcquisition(reason))
            }
        }
    }
}

/// Local destination for each input class.
#[must_use]
pub fn input_destination(layout: &ScratchLayout, kind: InputKind) -> PathBuf {
    match kind {
        InputKind::Primary => layout.primary_input_path(),
        InputKind::Target => layout.target_input_path(),
        InputKind::Scaffolds => layout.scaffolds_dir(),
    }
}

/// Fetches every present input into scratch, in order. The first failure is fatal.
pub async fn stage_inputs(
    store: &dyn ArtifactStore,
    inputs: &InputReferences,
    layout: &ScratchLayout,
) -> HarnessResult<Vec<PathBuf>> {
    let mut staged = Vec::new();
    for (kind, remote) in inputs.present() {
        let local = input_destination(layout, kind);
        info!(input = %kind, from = %remote, to = %local.display(), "Downloading input");
        let result = match kind {
            InputKind::Scaffolds => store.fetch_directory(remote, &local).await,
            InputKind::Primary | InputKind::Target => store.fetch(remote, &local).await,
        };
        result.map_err(|e| HarnessError::InputAcquisition {
            object: remote.to_string(),
            reason: e.to_string(),
        })?;
        staged.push(local);
    }
    Ok(staged)
}
