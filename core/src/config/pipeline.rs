use super::keyvalue::{parse_entries, Entry};
use super::{CalibrationTable, ConfigError};
use crate::model::SubjectDescriptor;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Numeric parameters of the native steps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepParams {
    /// Multiplier from annotation pixels to voxel units.
    pub pixel_scale: f64,
    /// Half-extent of the cubic block written per tile.
    pub block_radius: usize,
    pub smoothing_sigma_mm: f64,
    pub smoothing_threshold: f32,
}

impl Default for StepParams {
    fn default() -> Self {
        Self {
            pixel_scale: 0.001,
            block_radius: 3,
            smoothing_sigma_mm: 2.0,
            smoothing_threshold: 0.01,
        }
    }
}

/// Commands for the steps delegated to external tools.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolConfig {
    pub upsample_command: String,
    pub upsample_voxel_size: f64,
    pub slice_command: String,
    pub slice_script: PathBuf,
    pub registration_command: String,
    pub registration_threads: usize,
    pub apply_transform_command: String,
    pub mni_template_path: PathBuf,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            upsample_command: "mri_convert".into(),
            upsample_voxel_size: 0.5,
            slice_command: "Rscript".into(),
            slice_script: PathBuf::from("scripts/virtualmeatslicerNative.R"),
            registration_command: "antsRegistrationSyN.sh".into(),
            registration_threads: 4,
            apply_transform_command: "antsApplyTransforms".into(),
            mni_template_path: PathBuf::from(
                "Input/mni_icbm152_t1_nlin_sym_09b_hires_stripped.nii.gz",
            ),
        }
    }
}

/// Values from `special_<key>_<subject_id>` lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubjectOverrides {
    pub annotation_suffix: Option<String>,
    pub volume_filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineConfig {
    pub pipeline_version: String,
    pub subject_list: Vec<String>,
    pub output_base: PathBuf,
    pub input_volumes: PathBuf,
    pub volume_filename: String,
    pub subject_suffix: String,
    pub input_annotations: PathBuf,
    pub annotation_suffix: String,
    pub score_table: PathBuf,
    pub calibration_file: PathBuf,
    pub stain_marker: String,
    pub score_column: Option<String>,
    pub workers: usize,
    pub params: StepParams,
    pub tools: ToolConfig,
    pub overrides: BTreeMap<String, SubjectOverrides>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline_version: "unknown".into(),
            subject_list: Vec::new(),
            output_base: PathBuf::from("output"),
            input_volumes: PathBuf::from("Input/exvivo_transformed"),
            volume_filename: "001.mgz".into(),
            subject_suffix: "X".into(),
            input_annotations: PathBuf::from("Input/Halo_extract/Annotations"),
            annotation_suffix: "-A1-AT8.annotations".into(),
            score_table: PathBuf::from("Input/Halo_extract/Summary Analysis(in).csv"),
            calibration_file: PathBuf::from("config/manual_coordinates.txt"),
            stain_marker: "AT8".into(),
            score_column: None,
            workers: 1,
            params: StepParams::default(),
            tools: ToolConfig::default(),
            overrides: BTreeMap::new(),
        }
    }
}

fn parse_value<T>(entry: &Entry) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    entry
        .value
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            line: entry.line,
            key: entry.key.clone(),
            message: format!("`{}`: {}", entry.value, e),
        })
}

fn invalid(entry: &Entry, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        line: entry.line,
        key: entry.key.clone(),
        message: message.to_string(),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// `-A1-AT8.annotations` yields `A1`; the marker token must follow it.
pub fn slice_marker_from_suffix(suffix: &str) -> Result<String, ConfigError> {
    let mut tokens = suffix.trim_start_matches('-').split('-');
    match (tokens.next(), tokens.next()) {
        (Some(slice), Some(_marker)) if !slice.is_empty() => Ok(slice.to_string()),
        _ => Err(ConfigError::SliceMarker(suffix.to_string())),
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for entry in parse_entries(text)? {
            config.apply(&entry)?;
        }
        Ok(config)
    }

    fn apply(&mut self, entry: &Entry) -> Result<(), ConfigError> {
        if let Some(rest) = entry.key.strip_prefix("special_") {
            return self.apply_override(entry, rest);
        }
        let value = entry.value.clone();
        match entry.key.as_str() {
            "pipeline_version" => self.pipeline_version = value,
            "subject_list" => self.subject_list = split_list(&value),
            "output_base" => self.output_base = value.into(),
            "input_volumes" | "input_mgz_images" => self.input_volumes = value.into(),
            "volume_filename" | "mgz_filename" => self.volume_filename = value,
            "subject_suffix" => self.subject_suffix = value,
            "input_annotations" | "input_halo_annotations" => {
                self.input_annotations = value.into()
            }
            "annotation_suffix" => self.annotation_suffix = value,
            "score_table" => self.score_table = value.into(),
            "calibration_file" | "manual_coordinates_file" => self.calibration_file = value.into(),
            "stain_marker" => self.stain_marker = value,
            "score_column" => self.score_column = Some(value),
            "workers" => {
                let workers: usize = parse_value(entry)?;
                if workers == 0 {
                    return Err(invalid(entry, "worker pool needs at least one worker"));
                }
                self.workers = workers;
            }
            "pixel_scale" => {
                let scale: f64 = parse_value(entry)?;
                if !(scale.is_finite() && scale > 0.0) {
                    return Err(invalid(entry, "pixel scale must be positive"));
                }
                self.params.pixel_scale = scale;
            }
            "block_radius" => self.params.block_radius = parse_value(entry)?,
            "smoothing_sigma_mm" => {
                let sigma: f64 = parse_value(entry)?;
                if !(sigma.is_finite() && sigma >= 0.0) {
                    return Err(invalid(entry, "sigma must be non-negative"));
                }
                self.params.smoothing_sigma_mm = sigma;
            }
            "smoothing_threshold" => {
                let threshold: f32 = parse_value(entry)?;
                if !(threshold.is_finite() && threshold >= 0.0) {
                    return Err(invalid(entry, "threshold must be non-negative"));
                }
                self.params.smoothing_threshold = threshold;
            }
            "upsample_command" => self.tools.upsample_command = value,
            "upsample_voxel_size" => self.tools.upsample_voxel_size = parse_value(entry)?,
            "slice_command" => self.tools.slice_command = value,
            "slice_script" => self.tools.slice_script = value.into(),
            "registration_command" => self.tools.registration_command = value,
            "registration_threads" => self.tools.registration_threads = parse_value(entry)?,
            "apply_transform_command" => self.tools.apply_transform_command = value,
            "mni_template_path" => self.tools.mni_template_path = value.into(),
            other => log::warn!("line {}: ignoring unknown setting `{}`", entry.line, other),
        }
        Ok(())
    }

    fn apply_override(&mut self, entry: &Entry, rest: &str) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownOverride {
            line: entry.line,
            key: entry.key.clone(),
        };
        let (name, subject) = rest.split_once('_').ok_or_else(unknown)?;
        if subject.is_empty() {
            return Err(unknown());
        }
        let slot = self.overrides.entry(subject.to_string()).or_default();
        match name {
            "annotation" => slot.annotation_suffix = Some(entry.value.clone()),
            "volume" => slot.volume_filename = Some(entry.value.clone()),
            _ => return Err(unknown()),
        }
        Ok(())
    }

    pub fn score_column(&self) -> String {
        self.score_column
            .clone()
            .unwrap_or_else(|| format!("% {} Positive Tissue", self.stain_marker))
    }

    pub fn annotation_suffix_for(&self, subject: &str) -> &str {
        self.overrides
            .get(subject)
            .and_then(|o| o.annotation_suffix.as_deref())
            .unwrap_or(&self.annotation_suffix)
    }

    pub fn subject_output_dir(&self, subject: &str) -> PathBuf {
        self.output_base.join(subject)
    }

    /// Resolves the selected subjects (or `subject_list`) into descriptors.
    pub fn subjects(
        &self,
        calibration: &CalibrationTable,
        selection: Option<&[String]>,
    ) -> Result<Vec<SubjectDescriptor>, ConfigError> {
        let requested: Vec<String> = match selection {
            Some(ids) if !ids.is_empty() => ids.to_vec(),
            _ => self.subject_list.clone(),
        };
        if requested.is_empty() {
            return Err(ConfigError::Missing("subject_list".into()));
        }
        for id in self.overrides.keys() {
            if !requested.contains(id) {
                log::debug!("override for subject {} not used in this run", id);
            }
        }

        let mut seen = Vec::with_capacity(requested.len());
        let mut subjects = Vec::with_capacity(requested.len());
        for id in requested {
            if seen.contains(&id) {
                continue;
            }
            subjects.push(self.describe(&id, calibration)?);
            seen.push(id);
        }
        Ok(subjects)
    }

    fn describe(
        &self,
        id: &str,
        calibration: &CalibrationTable,
    ) -> Result<SubjectDescriptor, ConfigError> {
        let overrides = self.overrides.get(id).cloned().unwrap_or_default();
        let suffix = self.annotation_suffix_for(id);
        let volume_filename = overrides
            .volume_filename
            .as_deref()
            .unwrap_or(&self.volume_filename);
        Ok(SubjectDescriptor {
            id: id.to_string(),
            annotation_path: self.input_annotations.join(format!("{}{}", id, suffix)),
            native_volume_path: self
                .input_volumes
                .join(format!("{}{}", id, self.subject_suffix))
                .join(volume_filename),
            calibration: calibration.get(id),
            annotation_suffix: overrides.annotation_suffix,
            slice_marker: slice_marker_from_suffix(suffix)?,
            stain_marker: self.stain_marker.clone(),
            output_dir: self.subject_output_dir(id),
        })
    }
}
