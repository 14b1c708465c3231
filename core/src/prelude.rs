use crate::volume::VolumeError;
use std::path::{Path, PathBuf};

pub use crate::model::{
    CalibrationOffset, Score, SubjectDescriptor, TileRecord, TransformedCoordinate,
};
pub use crate::orchestrator::{PipelineStep, RunMode, StepName, StepStatus};

/// Error raised inside a single (subject, step) unit of work.
///
/// `Validation` means the step could not proceed for this subject and is
/// recorded as skipped; every other variant is recorded as failed.
#[derive(thiserror::Error, Debug)]
pub enum StepError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Volume(#[from] VolumeError),
    #[error("`{command}` exited with {}: {stderr}", exit_label(.code))]
    Tool {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("internal failure: {0}")]
    Internal(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "no exit code".to_string(),
    }
}

impl StepError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        StepError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn parse(path: &Path, message: impl ToString) -> Self {
        StepError::Parse {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, StepError::Validation(_))
    }
}

pub type StepResult<T> = Result<T, StepError>;
