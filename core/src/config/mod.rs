//! Typed pipeline configuration loaded from line-oriented `key=value` files.

pub mod calibration;
pub mod keyvalue;
pub mod pipeline;

pub use calibration::CalibrationTable;
pub use pipeline::{PipelineConfig, StepParams, SubjectOverrides, ToolConfig};

use std::path::PathBuf;

/// Problems that abort a run before any subject is processed.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: expected key=value, found `{text}`")]
    Malformed { line: usize, text: String },
    #[error("line {line}: invalid value for `{key}`: {message}")]
    InvalidValue {
        line: usize,
        key: String,
        message: String,
    },
    #[error("line {line}: unsupported subject override `{key}`")]
    UnknownOverride { line: usize, key: String },
    #[error("missing required setting `{0}`")]
    Missing(String),
    #[error("calibration line {line}: {message}")]
    Calibration { line: usize, message: String },
    #[error("calibration for subject `{0}` is listed more than once")]
    DuplicateCalibration(String),
    #[error("cannot derive a slice marker from annotation suffix `{0}`")]
    SliceMarker(String),
}
