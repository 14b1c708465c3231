use crate::workflow::config::WorkflowConfig;
use anyhow::Context;
use qnpcore::orchestrator::{build_steps, Orchestrator, RunMode, RunSummary, StepName};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
    workers: usize,
}

impl Runner {
    /// `workers` overrides the configured pool size when given.
    pub fn new(config: WorkflowConfig, workers: Option<usize>) -> Self {
        let workers = workers.unwrap_or(config.pipeline.workers).max(1);
        Self { config, workers }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    fn orchestrator(&self, steps: &[StepName]) -> Orchestrator {
        Orchestrator::new(build_steps(&self.config.pipeline, steps)).with_workers(self.workers)
    }

    pub fn execute(&self, mode: RunMode) -> anyhow::Result<RunSummary> {
        self.orchestrator(&self.config.steps)
            .run(&self.config.subjects, mode)
            .context("executing pipeline")
    }

    /// Subjects with materialized outputs, for every known step.
    pub fn info(&self) -> BTreeMap<StepName, usize> {
        self.orchestrator(&StepName::ALL)
            .materialized(&self.config.subjects)
    }

    /// Raw inputs (native volume and annotation file) that are absent.
    pub fn missing_inputs(&self) -> Vec<PathBuf> {
        self.config
            .subjects
            .iter()
            .flat_map(|subject| {
                [
                    subject.native_volume_path.clone(),
                    subject.annotation_path.clone(),
                ]
            })
            .filter(|path| !path.is_file())
            .collect()
    }
}
