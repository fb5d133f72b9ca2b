use crate::error::{HarnessError, HarnessResult};
use async_trait::async_trait;
use tokio::process::Command;

/// Checks that the hardware accelerator the workload needs is present.
#[async_trait]
pub trait AcceleratorProbe: Send + Sync {
    /// Returns a description of each detected device, or `AcceleratorUnavailable`.
    async fn detect(&self) -> HarnessResult<Vec<String>>;
}

/// Probe backed by `nvidia-smi`.
#[derive(Debug, Clone)]
pub struct NvidiaSmiProbe {
    program: String,
}

impl Default for NvidiaSmiProbe {
    fn default() -> Self {
        Self { program: "nvidia-smi".to_string() }
    }
}

impl NvidiaSmiProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_program(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }
}

#[async_trait]
impl AcceleratorProbe for NvidiaSmiProbe {
    async fn detect(&self) -> HarnessResult<Vec<String>> {
        let output = Command::new(&self.program)
            .args(["--query-gpu=name,memory.total", "--format=csv,noheader"])
            .output()
            .await
            .map_err(|e| HarnessError::AcceleratorUnavailable(format!("{} not runnable: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(HarnessError::AcceleratorUnavailable(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let devices = parse_devices(&String::from_utf8_lossy(&output.stdout));
        if devices.is_empty() {
            return Err(HarnessError::AcceleratorUnavailable("no GPU devices reported".to_string()));
        }
        Ok(devices)
    }
}

fn parse_devices(stdout: &str) -> Vec<String> {
    stdout.lines().map(str::trim).filter(|l| !l.is_empty()).map(ToString::to_string).collect()
}
