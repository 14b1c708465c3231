//! Steps that delegate to external neuroimaging tools.

use crate::config::ToolConfig;
use crate::model::SubjectDescriptor;
use crate::orchestrator::step::{PipelineStep, StepContext, StepName};
use crate::orchestrator::store::ArtifactStore;
use crate::orchestrator::tools::run_tool;
use crate::prelude::{StepError, StepResult};
use log::warn;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

fn arg(path: &Path) -> String {
    path.display().to_string()
}

fn create_dir(path: &Path) -> StepResult<()> {
    fs::create_dir_all(path).map_err(|e| StepError::io(path, e))
}

/// A zero exit is not enough; every declared artifact must be present.
fn verify_outputs(store: &dyn ArtifactStore, command: &str, outputs: &[PathBuf]) -> StepResult<()> {
    match outputs.iter().find(|path| !store.exists(path)) {
        Some(missing) => Err(StepError::Internal(format!(
            "{} succeeded but did not produce {}",
            command,
            missing.display()
        ))),
        None => Ok(()),
    }
}

/// Removes whatever a failed tool left behind so the next run does not
/// mistake it for a finished artifact.
fn discard_outputs(outputs: &[PathBuf]) {
    for path in outputs {
        let removed = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match removed {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                warn!("cannot remove partial output {}: {}", path.display(), e)
            }
            _ => {}
        }
    }
}

fn run_checked(
    ctx: &StepContext<'_>,
    command: &str,
    args: &[String],
    outputs: &[PathBuf],
) -> StepResult<()> {
    let result = run_tool(ctx.tools, command, args)
        .and_then(|_| verify_outputs(ctx.store, command, outputs));
    if result.is_err() {
        discard_outputs(outputs);
    }
    result
}

pub struct UpsampleStep {
    command: String,
    voxel_size: f64,
}

impl UpsampleStep {
    pub fn new(tools: &ToolConfig) -> Self {
        Self {
            command: tools.upsample_command.clone(),
            voxel_size: tools.upsample_voxel_size,
        }
    }

    fn args(&self, subject: &SubjectDescriptor) -> Vec<String> {
        let size = self.voxel_size.to_string();
        vec![
            "-vs".into(),
            size.clone(),
            size.clone(),
            size,
            arg(&subject.native_volume_path),
            arg(&subject.upsampled_volume()),
        ]
    }
}

impl PipelineStep for UpsampleStep {
    fn name(&self) -> StepName {
        StepName::Upsample
    }

    fn inputs(&self, subject: &SubjectDescriptor) -> Vec<PathBuf> {
        vec![subject.native_volume_path.clone()]
    }

    fn outputs(&self, subject: &SubjectDescriptor) -> Vec<PathBuf> {
        vec![subject.upsampled_volume()]
    }

    fn run(&self, subject: &SubjectDescriptor, ctx: &StepContext<'_>) -> StepResult<()> {
        create_dir(&subject.step_dir("_upsampled"))?;
        run_checked(ctx, &self.command, &self.args(subject), &self.outputs(subject))
    }
}

pub struct SliceStep {
    command: String,
    script: PathBuf,
}

impl SliceStep {
    pub fn new(tools: &ToolConfig) -> Self {
        Self {
            command: tools.slice_command.clone(),
            script: tools.slice_script.clone(),
        }
    }
}

impl PipelineStep for SliceStep {
    fn name(&self) -> StepName {
        StepName::Slice
    }

    fn inputs(&self, subject: &SubjectDescriptor) -> Vec<PathBuf> {
        vec![subject.upsampled_volume()]
    }

    fn outputs(&self, subject: &SubjectDescriptor) -> Vec<PathBuf> {
        vec![subject.slices_dir()]
    }

    fn run(&self, subject: &SubjectDescriptor, ctx: &StepContext<'_>) -> StepResult<()> {
        let slices = subject.slices_dir();
        create_dir(&slices)?;
        let args = vec![arg(&self.script), arg(&subject.upsampled_volume()), arg(&slices)];
        run_checked(ctx, &self.command, &args, &self.outputs(subject))
    }
}

pub struct RegisterStep {
    command: String,
    template: PathBuf,
    threads: usize,
}

impl RegisterStep {
    pub fn new(tools: &ToolConfig) -> Self {
        Self {
            command: tools.registration_command.clone(),
            template: tools.mni_template_path.clone(),
            threads: tools.registration_threads,
        }
    }
}

impl PipelineStep for RegisterStep {
    fn name(&self) -> StepName {
        StepName::Register
    }

    fn inputs(&self, subject: &SubjectDescriptor) -> Vec<PathBuf> {
        vec![subject.upsampled_volume(), self.template.clone()]
    }

    fn outputs(&self, subject: &SubjectDescriptor) -> Vec<PathBuf> {
        vec![subject.registration_affine(), subject.registration_warp()]
    }

    fn run(&self, subject: &SubjectDescriptor, ctx: &StepContext<'_>) -> StepResult<()> {
        create_dir(&subject.step_dir("_mni_registration"))?;
        let args = vec![
            "-d".into(),
            "3".into(),
            "-f".into(),
            arg(&self.template),
            "-m".into(),
            arg(&subject.upsampled_volume()),
            "-o".into(),
            arg(&subject.registration_prefix()),
            "-n".into(),
            self.threads.to_string(),
        ];
        run_checked(ctx, &self.command, &args, &self.outputs(subject))
    }
}

pub struct ApplyTransformStep {
    command: String,
    template: PathBuf,
}

impl ApplyTransformStep {
    pub fn new(tools: &ToolConfig) -> Self {
        Self {
            command: tools.apply_transform_command.clone(),
            template: tools.mni_template_path.clone(),
        }
    }
}

impl PipelineStep for ApplyTransformStep {
    fn name(&self) -> StepName {
        StepName::ApplyTransform
    }

    fn inputs(&self, subject: &SubjectDescriptor) -> Vec<PathBuf> {
        vec![
            subject.smoothed_mask(),
            self.template.clone(),
            subject.registration_warp(),
            subject.registration_affine(),
        ]
    }

    fn outputs(&self, subject: &SubjectDescriptor) -> Vec<PathBuf> {
        vec![subject.mni_mask()]
    }

    fn run(&self, subject: &SubjectDescriptor, ctx: &StepContext<'_>) -> StepResult<()> {
        // Transforms are applied last-listed first: affine, then warp.
        let args = vec![
            "-d".into(),
            "3".into(),
            "-i".into(),
            arg(&subject.smoothed_mask()),
            "-r".into(),
            arg(&self.template),
            "-o".into(),
            arg(&subject.mni_mask()),
            "-n".into(),
            "NearestNeighbor".into(),
            "-t".into(),
            arg(&subject.registration_warp()),
            "-t".into(),
            arg(&subject.registration_affine()),
        ];
        run_checked(ctx, &self.command, &args, &self.outputs(subject))
    }
}
