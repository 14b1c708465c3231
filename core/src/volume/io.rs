use super::header::{Datatype, NiftiHeader, DATA_OFFSET, HEADER_SIZE};
use super::{Volume, VolumeError};
use crate::fsio;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array3, ShapeBuilder};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

fn is_gzip(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "gz")
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> VolumeError + '_ {
    move |source| VolumeError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn open(path: &Path) -> Result<Box<dyn Read>, VolumeError> {
    let file = BufReader::new(File::open(path).map_err(io_error(path))?);
    Ok(if is_gzip(path) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    })
}

/// Reads only the header, enough to learn a grid's geometry.
pub fn read_header(path: &Path) -> Result<NiftiHeader, VolumeError> {
    let mut reader = open(path)?;
    let mut bytes = vec![0u8; HEADER_SIZE];
    reader.read_exact(&mut bytes).map_err(io_error(path))?;
    NiftiHeader::from_bytes(&bytes)
}

pub fn read_volume(path: &Path) -> Result<Volume, VolumeError> {
    let mut bytes = Vec::new();
    open(path)?.read_to_end(&mut bytes).map_err(io_error(path))?;
    let header = NiftiHeader::from_bytes(&bytes)?;
    let datatype = header.datatype()?;
    let count = header.voxel_count();
    let start = header.vox_offset();
    let end = start + count * datatype.size();
    if bytes.len() < end {
        return Err(VolumeError::Format(format!(
            "{} holds {} bytes, expected at least {}",
            path.display(),
            bytes.len(),
            end
        )));
    }

    let mut values = decode(&bytes[start..end], datatype, header.is_big_endian());
    if let Some((slope, inter)) = header.scaling() {
        if slope != 1.0 || inter != 0.0 {
            values.iter_mut().for_each(|v| *v = *v * slope + inter);
        }
    }

    // NIfTI stores x fastest, which is column-major order for [x, y, z].
    let [nx, ny, nz] = header.shape();
    let data = Array3::from_shape_vec((nx, ny, nz).f(), values)
        .map_err(|e| VolumeError::Format(e.to_string()))?;
    Volume::new(header, data)
}

fn decode(bytes: &[u8], datatype: Datatype, big_endian: bool) -> Vec<f32> {
    macro_rules! convert {
        ($ty:ty) => {
            bytes
                .chunks_exact(std::mem::size_of::<$ty>())
                .map(|chunk| {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(chunk);
                    let value = if big_endian {
                        <$ty>::from_be_bytes(raw)
                    } else {
                        <$ty>::from_le_bytes(raw)
                    };
                    value as f32
                })
                .collect()
        };
    }
    match datatype {
        Datatype::U8 => bytes.iter().map(|&b| b as f32).collect(),
        Datatype::I16 => convert!(i16),
        Datatype::U16 => convert!(u16),
        Datatype::I32 => convert!(i32),
        Datatype::F32 => convert!(f32),
        Datatype::F64 => convert!(f64),
    }
}

/// Writes float32 voxels under the volume's header, staged then renamed.
pub fn write_volume(path: &Path, volume: &Volume) -> Result<(), VolumeError> {
    let header = volume.header().as_float32();
    let mut payload = Vec::with_capacity(DATA_OFFSET + volume.data().len() * 4);
    payload.extend_from_slice(header.as_bytes());
    payload.extend_from_slice(&[0u8; DATA_OFFSET - HEADER_SIZE]);
    let big_endian = header.is_big_endian();
    // The transposed view iterates x fastest.
    for &value in volume.data().t().iter() {
        let bytes = if big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        };
        payload.extend_from_slice(&bytes);
    }

    let partial = fsio::prepare(path).map_err(io_error(path))?;
    let file = BufWriter::new(File::create(&partial).map_err(io_error(&partial))?);
    if is_gzip(path) {
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&payload).map_err(io_error(&partial))?;
        let mut inner = encoder.finish().map_err(io_error(&partial))?;
        inner.flush().map_err(io_error(&partial))?;
    } else {
        let mut file = file;
        file.write_all(&payload).map_err(io_error(&partial))?;
        file.flush().map_err(io_error(&partial))?;
    }
    fsio::commit(&partial, path).map_err(io_error(path))
}
