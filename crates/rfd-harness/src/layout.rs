use crate::error::HarnessResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Execution log file name inside the outputs directory.
pub const EXECUTION_LOG_NAME: &str = "rfdiffusion.log";

/// Output files that are never uploaded and never kept.
pub const TRANSIENT_PATTERNS: &[&str] = &["*.tmp"];

/// Filesystem layout of the scratch space inside the container.
///
/// Default layout:
/// - inputs under `/app/inputs` (`input.pdb`, `target.pdb`, `scaffolds/`)
/// - outputs under `/app/outputs`, with the execution log alongside
/// - weights under `/app/RFdiffusion/models`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScratchLayout {
    pub inputs_dir: PathBuf,
    pub outputs_dir: PathBuf,
    pub weights_dir: PathBuf,
    /// Working directory of the workload subprocess.
    pub work_dir: PathBuf,
}

impl Default for ScratchLayout {
    fn default() -> Self {
        Self {
            inputs_dir: PathBuf::from("/app/inputs"),
            outputs_dir: PathBuf::from("/app/outputs"),
            weights_dir: PathBuf::from("/app/RFdiffusion/models"),
            work_dir: PathBuf::from("/app/RFdiffusion"),
        }
    }
}

impl ScratchLayout {
    /// Layout with every directory under one root. Handy for tests and local runs.
    #[must_use]
    pub fn under(root: &Path) -> Self {
        Self {
            inputs_dir: root.join("inputs"),
            outputs_dir: root.join("outputs"),
            weights_dir: root.join("models"),
            work_dir: root.to_path_buf(),
        }
    }

    #[must_use]
    pub fn primary_input_path(&self) -> PathBuf {
        self.inputs_dir.join("input.pdb")
    }

    #[must_use]
    pub fn target_input_path(&self) -> PathBuf {
        self.inputs_dir.join("target.pdb")
    }

    #[must_use]
    pub fn scaffolds_dir(&self) -> PathBuf {
        self.inputs_dir.join("scaffolds")
    }

    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.outputs_dir.join(EXECUTION_LOG_NAME)
    }

    pub fn ensure_dirs(&self) -> HarnessResult<()> {
        std::fs::create_dir_all(&self.inputs_dir)?;
        std::fs::create_dir_all(&self.outputs_dir)?;
        std::fs::create_dir_all(&self.weights_dir)?;
        Ok(())
    }
}

/// Returns true if `dir` exists and holds at least one entry.
#[must_use]
pub fn dir_has_entries(dir: &Path) -> bool {
    std::fs::read_dir(dir).map(|mut entries| entries.next().is_some()).unwrap_or(false)
}

/// Removes scratch inputs and transient output files exactly once.
///
/// Runs on an explicit [`ScratchGuard::cleanup`] call or, failing that, on drop,
/// which also covers unwinding out of a panicking stage.
#[derive(Debug)]
pub struct ScratchGuard {
    layout: ScratchLayout,
    done: AtomicBool,
}

impl ScratchGuard {
    #[must_use]
    pub fn new(layout: ScratchLayout) -> Self {
        Self { layout, done: AtomicBool::new(false) }
    }

    /// Returns false if cleanup already ran.
    pub fn cleanup(&self) -> bool {
        if self.done.swap(true, Ordering::SeqCst) {
            return false;
        }

        if self.layout.inputs_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.layout.inputs_dir) {
                warn!(dir = %self.layout.inputs_dir.display(), error = %e, "Failed to remove scratch inputs");
            }
        }

        let patterns: Vec<glob::Pattern> =
            TRANSIENT_PATTERNS.iter().filter_map(|p| glob::Pattern::new(p).ok()).collect();
        for entry in walkdir::WalkDir::new(&self.layout.outputs_dir).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if patterns.iter().any(|p| p.matches(&name)) {
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    warn!(file = %entry.path().display(), error = %e, "Failed to remove transient file");
                }
            }
        }

        debug!("Scratch cleanup complete");
        true
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let layout = ScratchLayout::under(temp.path());

        assert!(layout.primary_input_path().ends_with("inputs/input.pdb"));
        assert!(layout.scaffolds_dir().starts_with(&layout.inputs_dir));
        assert_eq!(layout.log_path().file_name().unwrap(), EXECUTION_LOG_NAME);
    }

    #[test]
    fn test_cleanup_runs_once_and_keeps_results() {
        let temp = TempDir::new().unwrap();
        let layout = ScratchLayout::under(temp.path());
        layout.ensure_dirs().unwrap();
        std::fs::write(layout.primary_input_path(), "ATOM").unwrap();
        std::fs::write(layout.outputs_dir.join("design_0.pdb"), "ATOM").unwrap();
        std::fs::write(layout.outputs_dir.join("design_0.tmp"), "partial").unwrap();

        let guard = ScratchGuard::new(layout.clone());
        assert!(guard.cleanup());
        assert!(!guard.cleanup());

        assert!(!layout.inputs_dir.exists());
        assert!(layout.outputs_dir.join("design_0.pdb").exists());
        assert!(!layout.outputs_dir.join("design_0.tmp").exists());
    }

    #[test]
    fn test_cleanup_on_drop() {
        let temp = TempDir::new().unwrap();
        let layout = ScratchLayout::under(temp.path());
        layout.ensure_dirs().unwrap();

        drop(ScratchGuard::new(layout.clone()));
        assert!(!layout.inputs_dir.exists());
    }

    #[test]
    fn test_dir_has_entries() {
        let temp = TempDir::new().unwrap();
        assert!(!dir_has_entries(&temp.path().join("missing")));
        assert!(!dir_has_entries(temp.path()));
        std::fs::write(temp.path().join("Base_ckpt.pt"), "w").unwrap();
        assert!(dir_has_entries(temp.path()));
    }
}
