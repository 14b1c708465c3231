//! CSV persistence for the intermediate tile tables.

use crate::fsio;
use crate::prelude::{StepError, StepResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> StepResult<()> {
    let partial = fsio::prepare(path).map_err(|e| StepError::io(path, e))?;
    let mut writer = csv::Writer::from_path(&partial).map_err(|e| StepError::parse(&partial, e))?;
    for record in records {
        writer
            .serialize(record)
            .map_err(|e| StepError::parse(&partial, e))?;
    }
    writer.flush().map_err(|e| StepError::io(&partial, e))?;
    drop(writer);
    fsio::commit(&partial, path).map_err(|e| StepError::io(path, e))
}

pub fn read_records<T: DeserializeOwned>(path: &Path) -> StepResult<Vec<T>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| open_error(path, e))?;
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| StepError::parse(path, e))
}

fn open_error(path: &Path, err: csv::Error) -> StepError {
    match err.into_kind() {
        csv::ErrorKind::Io(source) => StepError::io(path, source),
        other => StepError::parse(path, format!("{:?}", other)),
    }
}
