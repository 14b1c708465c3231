use super::VolumeError;
use crate::math::MatrixHelper;
use ndarray::Array2;
use std::fmt;

pub const HEADER_SIZE: usize = 348;
/// Header plus the four-byte extension flag of a single-file image.
pub const DATA_OFFSET: usize = 352;

const DIM: usize = 40;
const DATATYPE: usize = 70;
const BITPIX: usize = 72;
const PIXDIM: usize = 76;
const VOX_OFFSET: usize = 108;
const SCL_SLOPE: usize = 112;
const SCL_INTER: usize = 116;
const XYZT_UNITS: usize = 123;
const CAL_MAX: usize = 124;
const CAL_MIN: usize = 128;
const QFORM_CODE: usize = 252;
const SFORM_CODE: usize = 254;
const QUATERN_B: usize = 256;
const QOFFSET_X: usize = 268;
const SROW_X: usize = 280;
const MAGIC: usize = 344;

/// Voxel storage types understood by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datatype {
    U8,
    I16,
    I32,
    F32,
    F64,
    U16,
}

impl Datatype {
    pub fn from_code(code: i16) -> Result<Self, VolumeError> {
        match code {
            2 => Ok(Datatype::U8),
            4 => Ok(Datatype::I16),
            8 => Ok(Datatype::I32),
            16 => Ok(Datatype::F32),
            64 => Ok(Datatype::F64),
            512 => Ok(Datatype::U16),
            other => Err(VolumeError::UnsupportedDatatype(other)),
        }
    }

    pub fn code(self) -> i16 {
        match self {
            Datatype::U8 => 2,
            Datatype::I16 => 4,
            Datatype::I32 => 8,
            Datatype::F32 => 16,
            Datatype::F64 => 64,
            Datatype::U16 => 512,
        }
    }

    pub fn size(self) -> usize {
        match self {
            Datatype::U8 => 1,
            Datatype::I16 | Datatype::U16 => 2,
            Datatype::I32 | Datatype::F32 => 4,
            Datatype::F64 => 8,
        }
    }
}

/// A NIfTI-1 header kept as its raw bytes so every geometry field of the
/// native image survives into derived volumes unchanged.
#[derive(Clone, PartialEq)]
pub struct NiftiHeader {
    raw: Vec<u8>,
    big_endian: bool,
}

impl NiftiHeader {
    /// Minimal little-endian float32 header with a diagonal sform.
    pub fn new(shape: [usize; 3], spacing: [f32; 3]) -> Self {
        let mut header = Self {
            raw: vec![0; HEADER_SIZE],
            big_endian: false,
        };
        header.set_i32(0, HEADER_SIZE as i32);
        header.set_i16(DIM, 3);
        for (axis, &extent) in shape.iter().enumerate() {
            header.set_i16(DIM + 2 * (axis + 1), extent as i16);
        }
        for slot in 4..8 {
            header.set_i16(DIM + 2 * slot, 1);
        }
        header.set_f32(PIXDIM, 1.0);
        for (axis, &step) in spacing.iter().enumerate() {
            header.set_f32(PIXDIM + 4 * (axis + 1), step);
        }
        header.raw[XYZT_UNITS] = 2;
        header.set_i16(SFORM_CODE, 1);
        for (row, &step) in spacing.iter().enumerate() {
            header.set_f32(SROW_X + 16 * row + 4 * row, step);
        }
        header.raw[MAGIC..MAGIC + 4].copy_from_slice(b"n+1\0");
        header.as_float32()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VolumeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(VolumeError::Format(format!(
                "header truncated at {} bytes",
                bytes.len()
            )));
        }
        let mut size = [0u8; 4];
        size.copy_from_slice(&bytes[..4]);
        let big_endian = if i32::from_le_bytes(size) == HEADER_SIZE as i32 {
            false
        } else if i32::from_be_bytes(size) == HEADER_SIZE as i32 {
            true
        } else {
            return Err(VolumeError::Format("not a NIfTI-1 header".into()));
        };
        let header = Self {
            raw: bytes[..HEADER_SIZE].to_vec(),
            big_endian,
        };
        match &header.raw[MAGIC..MAGIC + 4] {
            b"n+1\0" => {}
            b"ni1\0" => {
                return Err(VolumeError::Format(
                    "two-file (.hdr/.img) images are not supported".into(),
                ))
            }
            _ => return Err(VolumeError::Format("bad NIfTI magic".into())),
        }
        let rank = header.i16_at(DIM);
        if !(3..=7).contains(&rank) {
            return Err(VolumeError::Format(format!("unsupported rank {}", rank)));
        }
        for slot in 1..=3 {
            if header.i16_at(DIM + 2 * slot) < 1 {
                return Err(VolumeError::Format(format!("empty axis {}", slot)));
            }
        }
        for slot in 4..=rank as usize {
            if header.i16_at(DIM + 2 * slot) > 1 {
                return Err(VolumeError::Format(
                    "only single-frame volumes are supported".into(),
                ));
            }
        }
        Datatype::from_code(header.i16_at(DATATYPE))?;
        Ok(header)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn is_big_endian(&self) -> bool {
        self.big_endian
    }

    /// Same geometry, re-typed for float32 payloads written by this crate.
    pub fn as_float32(&self) -> Self {
        let mut header = self.clone();
        header.set_i16(DATATYPE, Datatype::F32.code());
        header.set_i16(BITPIX, 32);
        header.set_f32(VOX_OFFSET, DATA_OFFSET as f32);
        header.set_f32(SCL_SLOPE, 1.0);
        header.set_f32(SCL_INTER, 0.0);
        header.set_f32(CAL_MAX, 0.0);
        header.set_f32(CAL_MIN, 0.0);
        header
    }

    pub fn shape(&self) -> [usize; 3] {
        [1, 2, 3].map(|slot| self.i16_at(DIM + 2 * slot).max(1) as usize)
    }

    pub fn voxel_count(&self) -> usize {
        self.shape().iter().product()
    }

    /// Voxel size in millimetres; a zero or missing entry reads as 1.
    pub fn spacing(&self) -> [f32; 3] {
        [1, 2, 3].map(|slot| {
            let step = self.f32_at(PIXDIM + 4 * slot).abs();
            if step.is_finite() && step > 0.0 {
                step
            } else {
                1.0
            }
        })
    }

    pub fn datatype(&self) -> Result<Datatype, VolumeError> {
        Datatype::from_code(self.i16_at(DATATYPE))
    }

    pub fn vox_offset(&self) -> usize {
        let offset = self.f32_at(VOX_OFFSET);
        if offset.is_finite() && offset >= HEADER_SIZE as f32 {
            offset as usize
        } else {
            DATA_OFFSET
        }
    }

    /// `(slope, intercept)`, or `None` when the slope is zero (unscaled).
    pub fn scaling(&self) -> Option<(f32, f32)> {
        let slope = self.f32_at(SCL_SLOPE);
        (slope != 0.0 && slope.is_finite()).then(|| (slope, self.f32_at(SCL_INTER)))
    }

    pub fn qform_code(&self) -> i16 {
        self.i16_at(QFORM_CODE)
    }

    pub fn sform_code(&self) -> i16 {
        self.i16_at(SFORM_CODE)
    }

    /// Voxel-to-world 4x4 matrix: sform, else qform, else pixdim scaling.
    pub fn affine(&self) -> Array2<f64> {
        if self.sform_code() > 0 {
            let rows = [0, 1, 2].map(|row| {
                [0, 1, 2, 3].map(|col| self.f32_at(SROW_X + 16 * row + 4 * col) as f64)
            });
            MatrixHelper::affine_from_rows(rows)
        } else if self.qform_code() > 0 {
            let quatern = [0, 1, 2].map(|i| self.f32_at(QUATERN_B + 4 * i) as f64);
            let offset = [0, 1, 2].map(|i| self.f32_at(QOFFSET_X + 4 * i) as f64);
            let qfac = if self.f32_at(PIXDIM) < 0.0 { -1.0 } else { 1.0 };
            let spacing = self.spacing().map(f64::from);
            MatrixHelper::affine_from_quaternion(quatern, offset, spacing, qfac)
        } else {
            MatrixHelper::scaling(self.spacing().map(f64::from))
        }
    }

    fn i16_at(&self, offset: usize) -> i16 {
        let bytes = [self.raw[offset], self.raw[offset + 1]];
        if self.big_endian {
            i16::from_be_bytes(bytes)
        } else {
            i16::from_le_bytes(bytes)
        }
    }

    fn f32_at(&self, offset: usize) -> f32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.raw[offset..offset + 4]);
        if self.big_endian {
            f32::from_be_bytes(bytes)
        } else {
            f32::from_le_bytes(bytes)
        }
    }

    fn set_i16(&mut self, offset: usize, value: i16) {
        let bytes = if self.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        };
        self.raw[offset..offset + 2].copy_from_slice(&bytes);
    }

    fn set_i32(&mut self, offset: usize, value: i32) {
        let bytes = if self.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        };
        self.raw[offset..offset + 4].copy_from_slice(&bytes);
    }

    fn set_f32(&mut self, offset: usize, value: f32) {
        let bytes = if self.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        };
        self.raw[offset..offset + 4].copy_from_slice(&bytes);
    }

    #[cfg(test)]
    pub(crate) fn with_qform(mut self, quatern: [f32; 3], offset: [f32; 3]) -> Self {
        self.set_i16(SFORM_CODE, 0);
        self.set_i16(QFORM_CODE, 1);
        for i in 0..3 {
            self.set_f32(QUATERN_B + 4 * i, quatern[i]);
            self.set_f32(QOFFSET_X + 4 * i, offset[i]);
        }
        self
    }

    #[cfg(test)]
    pub(crate) fn swapped_endianness(&self) -> Self {
        let mut swapped = Self {
            raw: self.raw.clone(),
            big_endian: !self.big_endian,
        };
        swapped.set_i32(0, HEADER_SIZE as i32);
        for slot in 0..8 {
            swapped.set_i16(DIM + 2 * slot, self.i16_at(DIM + 2 * slot));
            swapped.set_f32(PIXDIM + 4 * slot, self.f32_at(PIXDIM + 4 * slot));
        }
        for offset in [DATATYPE, BITPIX, QFORM_CODE, SFORM_CODE] {
            swapped.set_i16(offset, self.i16_at(offset));
        }
        for offset in [VOX_OFFSET, SCL_SLOPE, SCL_INTER] {
            swapped.set_f32(offset, self.f32_at(offset));
        }
        for i in 0..12 {
            swapped.set_f32(SROW_X + 4 * i, self.f32_at(SROW_X + 4 * i));
        }
        swapped
    }

    #[cfg(test)]
    pub(crate) fn with_datatype(mut self, datatype: Datatype, slope: f32, inter: f32) -> Self {
        self.set_i16(DATATYPE, datatype.code());
        self.set_i16(BITPIX, (datatype.size() * 8) as i16);
        self.set_f32(SCL_SLOPE, slope);
        self.set_f32(SCL_INTER, inter);
        self
    }
}

impl fmt::Debug for NiftiHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NiftiHeader")
            .field("shape", &self.shape())
            .field("spacing", &self.spacing())
            .field("datatype", &self.i16_at(DATATYPE))
            .field("big_endian", &self.big_endian)
            .finish()
    }
}
