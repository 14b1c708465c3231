//! Native-grid volumes and their NIfTI-1 encoding.

pub mod header;
pub mod io;

pub use header::{Datatype, NiftiHeader};
pub use io::{read_header, read_volume, write_volume};

use ndarray::{Array2, Array3};
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum VolumeError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed volume: {0}")]
    Format(String),
    #[error("unsupported NIfTI datatype code {0}")]
    UnsupportedDatatype(i16),
    #[error("data shape {actual:?} does not match header shape {expected:?}")]
    ShapeMismatch {
        expected: [usize; 3],
        actual: [usize; 3],
    },
}

/// A 3-D value grid indexed `[x, y, z]` with the geometry of its header.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    header: NiftiHeader,
    data: Array3<f32>,
}

impl Volume {
    pub fn new(header: NiftiHeader, data: Array3<f32>) -> Result<Self, VolumeError> {
        let actual = shape_of(&data);
        let expected = header.shape();
        if actual != expected {
            return Err(VolumeError::ShapeMismatch { expected, actual });
        }
        Ok(Self {
            header: header.as_float32(),
            data,
        })
    }

    /// All-zero volume on the grid described by `template`.
    pub fn zeros(template: &NiftiHeader) -> Self {
        let [nx, ny, nz] = template.shape();
        Self {
            header: template.as_float32(),
            data: Array3::zeros((nx, ny, nz)),
        }
    }

    /// New volume on this volume's grid; the source is left untouched.
    pub fn derived(&self, data: Array3<f32>) -> Result<Self, VolumeError> {
        Self::new(self.header.clone(), data)
    }

    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn into_data(self) -> Array3<f32> {
        self.data
    }

    pub fn shape(&self) -> [usize; 3] {
        shape_of(&self.data)
    }

    pub fn spacing(&self) -> [f32; 3] {
        self.header.spacing()
    }

    pub fn affine(&self) -> Array2<f64> {
        self.header.affine()
    }
}

fn shape_of(data: &Array3<f32>) -> [usize; 3] {
    let (nx, ny, nz) = data.dim();
    [nx, ny, nz]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_volume_keeps_geometry_and_source() {
        let header = NiftiHeader::new([2, 3, 4], [0.5, 0.5, 0.5]);
        let base = Volume::zeros(&header);
        let mut filled = Array3::zeros((2, 3, 4));
        filled[[1, 2, 3]] = 5.0;
        let derived = base.derived(filled).unwrap();
        assert_eq!(derived.header(), base.header());
        assert_eq!(base.data().sum(), 0.0);
        assert_eq!(derived.data()[[1, 2, 3]], 5.0);
    }

    #[test]
    fn mismatched_shape_is_rejected() {
        let header = NiftiHeader::new([2, 2, 2], [1.0, 1.0, 1.0]);
        let err = Volume::new(header, Array3::zeros((2, 2, 3))).unwrap_err();
        assert!(matches!(err, VolumeError::ShapeMismatch { .. }));
    }
}
