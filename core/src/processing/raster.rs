use crate::model::TransformedCoordinate;
use crate::telemetry::log::LogManager;
use crate::volume::{NiftiHeader, Volume, VolumeError};
use ndarray::{s, Array3};
use serde::Serialize;

/// What happened to each coordinate during rasterization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RasterReport {
    /// Blocks written to the grid, including clipped ones.
    pub placed: usize,
    pub clipped: usize,
    /// Coordinates whose block missed the grid entirely.
    pub excluded: usize,
}

/// Writes each tile's score into a cube of half-extent `radius` around its
/// voxel, keeping the maximum where cubes overlap.
pub struct BlockRasterizer {
    radius: usize,
    logger: LogManager,
}

impl BlockRasterizer {
    pub fn new(radius: usize) -> Self {
        Self {
            radius,
            logger: LogManager::new(),
        }
    }

    pub fn for_subject(mut self, subject: &str) -> Self {
        self.logger = LogManager::scoped(subject, "rasterize");
        self
    }

    /// Rasterizes onto the grid described by `grid`, inheriting its geometry.
    pub fn rasterize(
        &self,
        coords: &[TransformedCoordinate],
        grid: &NiftiHeader,
    ) -> Result<(Volume, RasterReport), VolumeError> {
        let [nx, ny, nz] = grid.shape();
        let mut data = Array3::zeros((nx, ny, nz));
        let report = self.rasterize_into(coords, &mut data);
        Ok((Volume::new(grid.clone(), data)?, report))
    }

    pub fn rasterize_into(
        &self,
        coords: &[TransformedCoordinate],
        data: &mut Array3<f32>,
    ) -> RasterReport {
        let (nx, ny, nz) = data.dim();
        let extents = [nx, ny, nz];
        let radius = self.radius as i64;
        let mut report = RasterReport::default();

        for coord in coords {
            let centre = match voxel_centre(coord) {
                Some(centre) => centre,
                None => {
                    self.logger
                        .warn(&format!("{} has a non-finite coordinate; excluded", coord.tile));
                    report.excluded += 1;
                    continue;
                }
            };

            let mut bounds = [(0usize, 0usize); 3];
            let mut clipped = false;
            let mut outside = false;
            for axis in 0..3 {
                // Far-out centres saturate at the i64 limits when cast.
                let lo = centre[axis].saturating_sub(radius);
                let hi = centre[axis].saturating_add(radius);
                let last = extents[axis] as i64 - 1;
                if hi < 0 || lo > last {
                    outside = true;
                    break;
                }
                clipped |= lo < 0 || hi > last;
                bounds[axis] = (lo.max(0) as usize, hi.min(last) as usize);
            }

            if outside {
                self.logger.warn(&format!(
                    "{} at voxel ({}, {}, {}) lies outside grid {:?}; excluded",
                    coord.tile, centre[0], centre[1], centre[2], extents
                ));
                report.excluded += 1;
                continue;
            }
            if clipped {
                self.logger.warn(&format!(
                    "{} at voxel ({}, {}, {}) clipped to grid {:?}",
                    coord.tile, centre[0], centre[1], centre[2], extents
                ));
                report.clipped += 1;
            }

            let score = coord.score.value();
            let [(x0, x1), (y0, y1), (z0, z1)] = bounds;
            data.slice_mut(s![x0..=x1, y0..=y1, z0..=z1])
                .iter_mut()
                .for_each(|v| *v = v.max(score));
            report.placed += 1;
        }

        self.logger.detail(&format!(
            "placed {} blocks ({} clipped), excluded {}",
            report.placed, report.clipped, report.excluded
        ));
        report
    }
}

/// Nearest voxel, halves rounded away from zero.
fn voxel_centre(coord: &TransformedCoordinate) -> Option<[i64; 3]> {
    if !(coord.voxel_x.is_finite() && coord.voxel_z.is_finite()) {
        return None;
    }
    Some([
        coord.voxel_x.round() as i64,
        coord.voxel_y,
        coord.voxel_z.round() as i64,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Score;

    fn coord(name: &str, x: f64, y: i64, z: f64, score: f32) -> TransformedCoordinate {
        TransformedCoordinate {
            tile: name.into(),
            voxel_x: x,
            voxel_y: y,
            voxel_z: z,
            score: Score::new(score).unwrap(),
        }
    }

    #[test]
    fn overlapping_blocks_keep_the_maximum() {
        let rasterizer = BlockRasterizer::new(1);
        let mut data = Array3::zeros((10, 10, 10));
        let coords = vec![
            coord("Tile 1", 4.0, 5, 4.0, 30.0),
            coord("Tile 2", 5.0, 5, 5.0, 70.0),
            coord("Tile 3", 4.0, 5, 4.0, 20.0),
        ];
        let report = rasterizer.rasterize_into(&coords, &mut data);
        assert_eq!(report.placed, 3);
        // Shared by all three blocks.
        assert_eq!(data[[4, 5, 4]], 70.0);
        assert_eq!(data[[5, 5, 5]], 70.0);
        // Only the first and third blocks reach here.
        assert_eq!(data[[3, 5, 3]], 30.0);
    }

    #[test]
    fn block_spans_two_radius_plus_one_voxels() {
        let rasterizer = BlockRasterizer::new(3);
        let mut data = Array3::zeros((20, 20, 20));
        rasterizer.rasterize_into(&[coord("Tile 1", 10.0, 10, 10.0, 12.0)], &mut data);
        assert_eq!(data.iter().filter(|&&v| v == 12.0).count(), 7 * 7 * 7);
        assert_eq!(data[[7, 7, 7]], 12.0);
        assert_eq!(data[[6, 10, 10]], 0.0);
    }

    #[test]
    fn coordinates_round_to_the_nearest_voxel() {
        let rasterizer = BlockRasterizer::new(0);
        let mut data = Array3::zeros((5, 5, 5));
        rasterizer.rasterize_into(&[coord("Tile 1", 1.5, 2, 2.4, 9.0)], &mut data);
        assert_eq!(data[[2, 2, 2]], 9.0);
        assert_eq!(data.iter().filter(|&&v| v != 0.0).count(), 1);
    }

    #[test]
    fn partially_outside_block_is_clipped() {
        let rasterizer = BlockRasterizer::new(2);
        let mut data = Array3::zeros((6, 6, 6));
        let report = rasterizer.rasterize_into(&[coord("Tile 1", 0.0, 0, 5.0, 50.0)], &mut data);
        assert_eq!(report, RasterReport { placed: 1, clipped: 1, excluded: 0 });
        assert_eq!(data.iter().filter(|&&v| v == 50.0).count(), 3 * 3 * 3);
    }

    #[test]
    fn block_entirely_outside_is_excluded() {
        let rasterizer = BlockRasterizer::new(1);
        let mut data = Array3::zeros((4, 4, 4));
        let coords = vec![
            coord("Tile 1", 10.0, 1, 1.0, 40.0),
            coord("Tile 2", 1.0, -2, 1.0, 40.0),
            coord("Tile 3", 1.0, 1, 1.0, 15.0),
            coord("Tile 4", f64::NAN, 1, 1.0, 15.0),
        ];
        let report = rasterizer.rasterize_into(&coords, &mut data);
        assert_eq!(report, RasterReport { placed: 1, clipped: 0, excluded: 3 });
        assert_eq!(crate::math::StatsHelper::max(data.as_slice().unwrap()), 15.0);
    }

    #[test]
    fn far_out_coordinates_are_excluded() {
        let rasterizer = BlockRasterizer::new(2);
        let mut data = Array3::zeros((4, 4, 4));
        let coords = vec![
            coord("Tile 1", 1e300, 1, 1.0, 40.0),
            coord("Tile 2", 1.0, i64::MIN, -1e300, 40.0),
            coord("Tile 3", 1.0, i64::MAX, 1.0, 40.0),
        ];
        let report = rasterizer.rasterize_into(&coords, &mut data);
        assert_eq!(report, RasterReport { placed: 0, clipped: 0, excluded: 3 });
        assert!(data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn rasterized_volume_inherits_grid_geometry() {
        let grid = NiftiHeader::new([8, 8, 8], [0.5, 0.5, 0.5]);
        let (volume, report) = BlockRasterizer::new(1)
            .for_subject("6966")
            .rasterize(&[coord("Tile 1", 3.0, 3, 3.0, 60.0)], &grid)
            .unwrap();
        assert_eq!(report.placed, 1);
        assert_eq!(volume.header(), &grid.as_float32());
        assert_eq!(volume.data()[[3, 3, 3]], 60.0);
    }
}
