use anyhow::Context;
use log::{info, warn};
use qnpcore::config::{CalibrationTable, PipelineConfig};
use qnpcore::model::SubjectDescriptor;
use qnpcore::orchestrator::StepName;
use std::path::Path;

/// Everything a run needs, resolved up front so that configuration problems
/// surface before any subject is touched.
#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub pipeline: PipelineConfig,
    pub calibration: CalibrationTable,
    pub steps: Vec<StepName>,
    pub subjects: Vec<SubjectDescriptor>,
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(
        path: P,
        steps: &[StepName],
        subject_ids: &[String],
    ) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let pipeline = PipelineConfig::load(path_ref)
            .with_context(|| format!("reading pipeline config {}", path_ref.display()))?;
        Self::resolve(pipeline, steps, subject_ids)
    }

    pub fn resolve(
        pipeline: PipelineConfig,
        steps: &[StepName],
        subject_ids: &[String],
    ) -> anyhow::Result<Self> {
        let steps = if steps.is_empty() {
            StepName::default_selection()
        } else {
            StepName::normalize(steps.to_vec())
        };
        if steps.iter().any(|step| step.is_registration()) {
            warn!("MNI registration requested; each subject may take hours");
        }

        let needs_calibration = steps.contains(&StepName::Transform);
        let calibration = CalibrationTable::load(&pipeline.calibration_file, needs_calibration)
            .with_context(|| {
                format!("reading calibration file {}", pipeline.calibration_file.display())
            })?;

        let selection = (!subject_ids.is_empty()).then_some(subject_ids);
        let subjects = pipeline
            .subjects(&calibration, selection)
            .context("resolving subjects")?;

        info!(
            "pipeline {}: {} subject(s), {} calibration entr{}, steps [{}]",
            pipeline.pipeline_version,
            subjects.len(),
            calibration.len(),
            if calibration.len() == 1 { "y" } else { "ies" },
            steps
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self {
            pipeline,
            calibration,
            steps,
            subjects,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(body: &str) -> NamedTempFile {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(body.as_bytes()).unwrap();
        temp
    }

    #[test]
    fn missing_calibration_is_fatal_only_for_transform() {
        let temp = config_file(
            "subject_list = 6966, 7038\ncalibration_file = /nonexistent/manual_coordinates.txt\n",
        );
        let cfg = WorkflowConfig::load(temp.path(), &[StepName::Extract], &[]).unwrap();
        assert_eq!(cfg.subjects.len(), 2);
        assert!(cfg.calibration.is_empty());

        let err = WorkflowConfig::load(temp.path(), &[StepName::Transform], &[]).unwrap_err();
        assert!(format!("{:#}", err).contains("manual_coordinates.txt"));
    }

    #[test]
    fn cli_subjects_replace_the_configured_list() {
        let temp = config_file("subject_list = 6966, 7038\n");
        let subjects = ["7038".to_string()];
        let cfg = WorkflowConfig::load(temp.path(), &[StepName::Smooth], &subjects).unwrap();
        let ids: Vec<&str> = cfg.subjects.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["7038"]);
    }

    #[test]
    fn empty_selection_uses_native_steps() {
        let dir = tempfile::tempdir().unwrap();
        let calibration = dir.path().join("manual_coordinates.txt");
        std::fs::write(&calibration, "6966=200,278,200\n").unwrap();
        let temp = config_file(&format!(
            "subject_list = 6966\ncalibration_file = {}\n",
            calibration.display()
        ));
        let cfg = WorkflowConfig::load(temp.path(), &[], &[]).unwrap();
        assert_eq!(cfg.steps, StepName::default_selection());
        assert!(cfg.subjects[0].calibration.is_some());
    }

    #[test]
    fn malformed_line_reports_its_number() {
        let temp = config_file("subject_list = 6966\nthis line has no separator\n");
        let err = WorkflowConfig::load(temp.path(), &[], &[]).unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }
}
