use crate::model::SubjectDescriptor;
use crate::orchestrator::store::ArtifactStore;
use crate::orchestrator::tools::ToolRunner;
use crate::prelude::StepResult;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Pipeline steps in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Upsample,
    Slice,
    Extract,
    Transform,
    Rasterize,
    Smooth,
    Register,
    ApplyTransform,
}

impl StepName {
    pub const ALL: [StepName; 8] = [
        StepName::Upsample,
        StepName::Slice,
        StepName::Extract,
        StepName::Transform,
        StepName::Rasterize,
        StepName::Smooth,
        StepName::Register,
        StepName::ApplyTransform,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StepName::Upsample => "upsample",
            StepName::Slice => "slice",
            StepName::Extract => "extract",
            StepName::Transform => "transform",
            StepName::Rasterize => "rasterize",
            StepName::Smooth => "smooth",
            StepName::Register => "register",
            StepName::ApplyTransform => "apply_transform",
        }
    }

    /// Native-space steps; MNI registration runs only on request.
    pub fn default_selection() -> Vec<StepName> {
        Self::ALL
            .iter()
            .copied()
            .filter(|step| *step <= StepName::Smooth)
            .collect()
    }

    pub fn is_registration(self) -> bool {
        matches!(self, StepName::Register | StepName::ApplyTransform)
    }

    /// Sorts into execution order and drops duplicates.
    pub fn normalize(mut steps: Vec<StepName>) -> Vec<StepName> {
        steps.sort();
        steps.dedup();
        steps
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for StepName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        let alias = match wanted.as_str() {
            "mni" | "mni_registration" => Some(StepName::Register),
            "apply" | "apply_transforms" => Some(StepName::ApplyTransform),
            _ => None,
        };
        alias
            .or_else(|| Self::ALL.iter().copied().find(|step| step.as_str() == wanted))
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|step| step.as_str()).collect();
                format!("unknown step `{}` (expected one of {})", s, known.join(", "))
            })
    }
}

/// Shared services available to a running step.
pub struct StepContext<'a> {
    pub tools: &'a dyn ToolRunner,
    pub store: &'a dyn ArtifactStore,
}

/// One unit of per-subject work with declared artifacts.
///
/// `inputs` and `outputs` drive the skip decisions; `validate` covers
/// prerequisites that are not files.
pub trait PipelineStep: Send + Sync {
    fn name(&self) -> StepName;
    fn inputs(&self, subject: &SubjectDescriptor) -> Vec<PathBuf>;
    fn outputs(&self, subject: &SubjectDescriptor) -> Vec<PathBuf>;

    fn validate(&self, _subject: &SubjectDescriptor) -> Result<(), String> {
        Ok(())
    }

    fn run(&self, subject: &SubjectDescriptor, ctx: &StepContext<'_>) -> StepResult<()>;
}
