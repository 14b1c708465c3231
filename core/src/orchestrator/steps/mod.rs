pub mod external;
pub mod native;

pub use external::{ApplyTransformStep, RegisterStep, SliceStep, UpsampleStep};
pub use native::{ExtractStep, RasterizeStep, SmoothStep, TransformStep};

use crate::config::PipelineConfig;
use crate::orchestrator::step::{PipelineStep, StepName};
use std::sync::Arc;

pub fn build_step(name: StepName, config: &PipelineConfig) -> Arc<dyn PipelineStep> {
    match name {
        StepName::Upsample => Arc::new(UpsampleStep::new(&config.tools)),
        StepName::Slice => Arc::new(SliceStep::new(&config.tools)),
        StepName::Extract => Arc::new(ExtractStep::new(
            config.params.pixel_scale,
            &config.score_table,
            config.score_column(),
        )),
        StepName::Transform => Arc::new(TransformStep),
        StepName::Rasterize => Arc::new(RasterizeStep::new(config.params.block_radius)),
        StepName::Smooth => Arc::new(SmoothStep::from_params(&config.params)),
        StepName::Register => Arc::new(RegisterStep::new(&config.tools)),
        StepName::ApplyTransform => Arc::new(ApplyTransformStep::new(&config.tools)),
    }
}

/// Builds the selected steps in execution order.
pub fn build_steps(config: &PipelineConfig, selection: &[StepName]) -> Vec<Arc<dyn PipelineStep>> {
    StepName::normalize(selection.to_vec())
        .into_iter()
        .map(|name| build_step(name, config))
        .collect()
}
