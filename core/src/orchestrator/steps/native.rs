//! Steps implemented in-process on top of `processing`.

use crate::config::StepParams;
use crate::model::table::{read_records, write_records};
use crate::model::{SubjectDescriptor, TileRecord, TransformedCoordinate};
use crate::orchestrator::step::{PipelineStep, StepContext, StepName};
use crate::prelude::{StepError, StepResult};
use crate::processing::{
    BlockRasterizer, CoordinateExtractor, CoordinateTransformer, KernelSmoother,
};
use crate::telemetry::LogManager;
use crate::volume::{read_header, read_volume, write_volume};
use std::path::PathBuf;

pub struct ExtractStep {
    pixel_scale: f64,
    score_table: PathBuf,
    score_column: String,
}

impl ExtractStep {
    pub fn new(
        pixel_scale: f64,
        score_table: impl Into<PathBuf>,
        score_column: impl Into<String>,
    ) -> Self {
        Self {
            pixel_scale,
            score_table: score_table.into(),
            score_column: score_column.into(),
        }
    }
}

impl PipelineStep for ExtractStep {
    fn name(&self) -> StepName {
        StepName::Extract
    }

    fn inputs(&self, subject: &SubjectDescriptor) -> Vec<PathBuf> {
        vec![subject.annotation_path.clone(), self.score_table.clone()]
    }

    fn outputs(&self, subject: &SubjectDescriptor) -> Vec<PathBuf> {
        vec![subject.tile_table()]
    }

    fn run(&self, subject: &SubjectDescriptor, _ctx: &StepContext<'_>) -> StepResult<()> {
        let extractor =
            CoordinateExtractor::new(self.pixel_scale, &self.score_table, &self.score_column);
        let records = extractor
            .for_subject(&subject.id)
            .extract(subject)?;
        write_records(&subject.tile_table(), &records)
    }
}

pub struct TransformStep;

impl PipelineStep for TransformStep {
    fn name(&self) -> StepName {
        StepName::Transform
    }

    fn inputs(&self, subject: &SubjectDescriptor) -> Vec<PathBuf> {
        vec![subject.tile_table()]
    }

    fn outputs(&self, subject: &SubjectDescriptor) -> Vec<PathBuf> {
        vec![subject.transformed_table()]
    }

    fn validate(&self, subject: &SubjectDescriptor) -> Result<(), String> {
        match subject.calibration {
            Some(_) => Ok(()),
            None => Err(format!("no calibration entry for subject {}", subject.id)),
        }
    }

    fn run(&self, subject: &SubjectDescriptor, _ctx: &StepContext<'_>) -> StepResult<()> {
        let offset = subject.calibration.ok_or_else(|| {
            StepError::Validation(format!("no calibration entry for subject {}", subject.id))
        })?;
        let tiles: Vec<TileRecord> = read_records(&subject.tile_table())?;
        let coords = CoordinateTransformer::transform(&tiles, offset);
        LogManager::scoped(&subject.id, self.name()).detail(&format!(
            "{} tiles placed on slice {}",
            coords.len(),
            offset.fixed_slice
        ));
        write_records(&subject.transformed_table(), &coords)
    }
}

pub struct RasterizeStep {
    block_radius: usize,
}

impl RasterizeStep {
    pub fn new(block_radius: usize) -> Self {
        Self { block_radius }
    }
}

impl PipelineStep for RasterizeStep {
    fn name(&self) -> StepName {
        StepName::Rasterize
    }

    fn inputs(&self, subject: &SubjectDescriptor) -> Vec<PathBuf> {
        vec![subject.transformed_table(), subject.upsampled_volume()]
    }

    fn outputs(&self, subject: &SubjectDescriptor) -> Vec<PathBuf> {
        vec![subject.mask_block()]
    }

    fn run(&self, subject: &SubjectDescriptor, _ctx: &StepContext<'_>) -> StepResult<()> {
        let coords: Vec<TransformedCoordinate> = read_records(&subject.transformed_table())?;
        let grid = read_header(&subject.upsampled_volume())?;
        let (volume, report) = BlockRasterizer::new(self.block_radius)
            .for_subject(&subject.id)
            .rasterize(&coords, &grid)?;
        if report.placed == 0 {
            LogManager::scoped(&subject.id, self.name())
                .warn("no block landed inside the grid; writing an empty mask");
        }
        write_volume(&subject.mask_block(), &volume)?;
        Ok(())
    }
}

pub struct SmoothStep {
    sigma_mm: f64,
    threshold: f32,
}

impl SmoothStep {
    pub fn new(sigma_mm: f64, threshold: f32) -> Self {
        Self { sigma_mm, threshold }
    }

    pub fn from_params(params: &StepParams) -> Self {
        Self::new(params.smoothing_sigma_mm, params.smoothing_threshold)
    }
}

impl PipelineStep for SmoothStep {
    fn name(&self) -> StepName {
        StepName::Smooth
    }

    fn inputs(&self, subject: &SubjectDescriptor) -> Vec<PathBuf> {
        vec![subject.mask_block()]
    }

    fn outputs(&self, subject: &SubjectDescriptor) -> Vec<PathBuf> {
        vec![subject.smoothed_mask()]
    }

    fn run(&self, subject: &SubjectDescriptor, _ctx: &StepContext<'_>) -> StepResult<()> {
        let mask = read_volume(&subject.mask_block())?;
        let smoothed = KernelSmoother::new(self.sigma_mm, self.threshold)
            .for_subject(&subject.id)
            .smooth(&mask)?;
        write_volume(&subject.smoothed_mask(), &smoothed)?;
        Ok(())
    }
}
