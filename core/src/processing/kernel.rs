use crate::math::gaussian::{GaussianKernel, DEFAULT_TRUNCATE};
use crate::math::StatsHelper;
use crate::prelude::StepResult;
use crate::processing::buffer_pool::BufferPool;
use crate::telemetry::log::LogManager;
use crate::volume::Volume;
use ndarray::{Array3, Axis};

/// Isotropic Gaussian smoothing in millimetres followed by a hard cutoff.
pub struct KernelSmoother {
    sigma_mm: f64,
    threshold: f32,
    pool: BufferPool,
    logger: LogManager,
}

impl KernelSmoother {
    pub fn new(sigma_mm: f64, threshold: f32) -> Self {
        Self {
            sigma_mm,
            threshold,
            pool: BufferPool::with_capacity(2),
            logger: LogManager::new(),
        }
    }

    pub fn for_subject(mut self, subject: &str) -> Self {
        self.logger = LogManager::scoped(subject, "smooth");
        self
    }

    /// Returns a new volume on the input's grid: values `<= threshold` become
    /// exactly zero, the rest are kept as filtered.
    pub fn smooth(&mut self, volume: &Volume) -> StepResult<Volume> {
        let mut data = volume.data().to_owned();
        let spacing = volume.spacing();
        for (axis, &step) in spacing.iter().enumerate() {
            let sigma_voxels = self.sigma_mm / step as f64;
            let lane = data.len_of(Axis(axis));
            match GaussianKernel::new(sigma_voxels, DEFAULT_TRUNCATE, lane) {
                Some(kernel) => {
                    self.logger.detail(&format!(
                        "axis {}: sigma {:.3} voxels, radius {}",
                        axis,
                        sigma_voxels,
                        kernel.radius()
                    ));
                    self.filter_axis(&mut data, Axis(axis), &kernel)?;
                }
                None => self.logger.detail(&format!("axis {}: no smoothing", axis)),
            }
        }
        self.pool.reset();

        let threshold = self.threshold;
        data.mapv_inplace(|v| if v <= threshold { 0.0 } else { v });
        if let Some(values) = data.as_slice_memory_order() {
            self.logger.detail(&format!(
                "kept {} voxels in [{:.4}, {:.4}]",
                StatsHelper::nonzero(values),
                StatsHelper::min_nonzero(values),
                StatsHelper::max(values)
            ));
        }
        Ok(volume.derived(data)?)
    }

    fn filter_axis(
        &mut self,
        data: &mut Array3<f32>,
        axis: Axis,
        kernel: &GaussianKernel,
    ) -> StepResult<()> {
        let len = data.len_of(axis);
        for mut lane in data.lanes_mut(axis) {
            let mut source = self.pool.checkout(len)?;
            let mut filtered = self.pool.checkout(len)?;
            source
                .iter_mut()
                .zip(lane.iter())
                .for_each(|(dst, &v)| *dst = v);
            kernel.convolve_reflect(&source, &mut filtered);
            lane.iter_mut()
                .zip(filtered.iter())
                .for_each(|(dst, &v)| *dst = v);
            self.pool.release(source);
            self.pool.release(filtered);
        }
        Ok(())
    }
}
