use crate::model::{CalibrationOffset, TileRecord, TransformedCoordinate};

/// Places 2-D tile coordinates into the native grid. Annotation `x` runs
/// along the lateral axis, annotation `y` along depth, and the calibration
/// supplies the fixed slice. Out-of-grid results are left for the
/// rasterizer to report.
pub struct CoordinateTransformer;

impl CoordinateTransformer {
    pub fn transform_tile(tile: &TileRecord, offset: CalibrationOffset) -> TransformedCoordinate {
        TransformedCoordinate {
            tile: tile.tile.clone(),
            voxel_x: tile.x + offset.lateral as f64,
            voxel_y: offset.fixed_slice,
            voxel_z: tile.y + offset.depth as f64,
            score: tile.score,
        }
    }

    pub fn transform(
        tiles: &[TileRecord],
        offset: CalibrationOffset,
    ) -> Vec<TransformedCoordinate> {
        tiles
            .iter()
            .map(|tile| Self::transform_tile(tile, offset))
            .collect()
    }
}
