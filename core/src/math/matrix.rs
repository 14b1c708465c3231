use ndarray::{arr1, Array2};

pub struct MatrixHelper;

impl MatrixHelper {
    /// 4x4 affine from the three stored rows (NIfTI sform layout).
    pub fn affine_from_rows(rows: [[f64; 4]; 3]) -> Array2<f64> {
        let mut affine = Array2::eye(4);
        for (r, row) in rows.iter().enumerate() {
            for (c, &value) in row.iter().enumerate() {
                affine[[r, c]] = value;
            }
        }
        affine
    }

    pub fn scaling(spacing: [f64; 3]) -> Array2<f64> {
        let mut affine = Array2::eye(4);
        for (axis, &step) in spacing.iter().enumerate() {
            affine[[axis, axis]] = step;
        }
        affine
    }

    /// qform affine: rotation from the quaternion (b, c, d), then voxel
    /// scaling with `qfac` flipping the third axis, then the offset.
    pub fn affine_from_quaternion(
        quatern: [f64; 3],
        offset: [f64; 3],
        spacing: [f64; 3],
        qfac: f64,
    ) -> Array2<f64> {
        let [b, c, d] = quatern;
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let rotation = ndarray::array![
            [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
            [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
            [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - c * c - b * b],
        ];
        let scale = Array2::from_diag(&arr1(&[spacing[0], spacing[1], qfac * spacing[2]]));
        let linear = rotation.dot(&scale);

        let mut affine = Array2::eye(4);
        for r in 0..3 {
            for c in 0..3 {
                affine[[r, c]] = linear[[r, c]];
            }
            affine[[r, 3]] = offset[r];
        }
        affine
    }

    /// Maps a voxel index to world coordinates.
    pub fn apply(affine: &Array2<f64>, voxel: [f64; 3]) -> [f64; 3] {
        let point = affine.dot(&arr1(&[voxel[0], voxel[1], voxel[2], 1.0]));
        [point[0], point[1], point[2]]
    }
}
