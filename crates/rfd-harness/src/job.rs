use crate::stager::ObjectLocation;
use serde::{Deserialize, Serialize};

/// Opaque identifier assigned to the job by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Input class a staged object belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    /// Primary structure file.
    Primary,
    /// Optional binder target structure.
    Target,
    /// Collection of scaffold structures under a prefix.
    Scaffolds,
}

impl std::fmt::Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Primary => "input structure",
            Self::Target => "target structure",
            Self::Scaffolds => "scaffolds",
        };
        f.write_str(s)
    }
}

/// Object-store references for the job's inputs. Every class is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputReferences {
    pub primary: Option<ObjectLocation>,
    pub target: Option<ObjectLocation>,
    pub scaffolds: Option<ObjectLocation>,
}

impl InputReferences {
    /// Present inputs in staging order: primary, target, scaffolds.
    #[must_use]
    pub fn present(&self) -> Vec<(InputKind, &ObjectLocation)> {
        [
            (InputKind::Primary, self.primary.as_ref()),
            (InputKind::Target, self.target.as_ref()),
            (InputKind::Scaffolds, self.scaffolds.as_ref()),
        ]
        .into_iter()
        .filter_map(|(kind, loc)| loc.map(|l| (kind, l)))
        .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.target.is_none() && self.scaffolds.is_none()
    }
}

/// Everything that identifies one execution. Read once at startup, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: JobId,
    /// Shell command line that runs the workload.
    pub command: String,
    pub inputs: InputReferences,
    /// Where produced artifacts are uploaded, if anywhere.
    pub output_prefix: Option<ObjectLocation>,
}
