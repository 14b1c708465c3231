use super::keyvalue::parse_entries;
use super::ConfigError;
use crate::model::CalibrationOffset;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Per-subject calibration offsets, one `id=lateral,fixed_slice,depth` line each.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationTable {
    entries: BTreeMap<String, CalibrationOffset>,
}

impl CalibrationTable {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut entries = BTreeMap::new();
        for entry in parse_entries(text)? {
            let parts: Vec<&str> = entry.value.split(',').map(str::trim).collect();
            let values = match parts.as_slice() {
                [lateral, slice, depth] => [lateral, slice, depth]
                    .iter()
                    .map(|v| v.parse::<i64>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| ConfigError::Calibration {
                        line: entry.line,
                        message: format!("`{}`: {}", entry.value, e),
                    })?,
                _ => {
                    return Err(ConfigError::Calibration {
                        line: entry.line,
                        message: format!(
                            "expected lateral,fixed_slice,depth, found `{}`",
                            entry.value
                        ),
                    })
                }
            };
            let offset = CalibrationOffset::new(values[0], values[1], values[2]);
            if entries.insert(entry.key.clone(), offset).is_some() {
                return Err(ConfigError::DuplicateCalibration(entry.key));
            }
        }
        Ok(Self { entries })
    }

    /// Loads the table; a missing file yields an empty table unless `required`.
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(err) if err.kind() == ErrorKind::NotFound && !required => {
                log::debug!("no calibration file at {}", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn get(&self, subject: &str) -> Option<CalibrationOffset> {
        self.entries.get(subject).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
