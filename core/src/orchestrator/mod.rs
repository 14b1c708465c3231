//! Per-subject step sequencing with artifact-based skipping.
//!
//! For every (subject, step) the orchestrator decides, in order: skip after an
//! earlier failure, skip when all outputs exist (unless forced), skip on a
//! failed validation or a missing input, report "would run" in a dry run, and
//! otherwise execute. Subjects are independent and may run on a worker pool;
//! steps within a subject always run in order.

pub mod record;
pub mod step;
pub mod steps;
pub mod store;
pub mod tools;

pub use record::{RunSummary, StepRecord, StepStatus};
pub use step::{PipelineStep, StepContext, StepName};
pub use steps::{build_step, build_steps};
pub use store::{ArtifactStore, FsArtifactStore, MemoryArtifactStore};
pub use tools::{ProcessRunner, ToolOutput, ToolRunner};

use crate::model::SubjectDescriptor;
use crate::prelude::{StepError, StepResult};
use crate::telemetry::LogManager;
use log::info;
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Normal,
    /// Re-run steps even when their outputs exist.
    Force,
    /// Decide and report without writing or invoking anything.
    DryRun,
}

/// State shared by every worker for the duration of a run.
struct RunContext {
    steps: Vec<Arc<dyn PipelineStep>>,
    store: Arc<dyn ArtifactStore>,
    tools: Arc<dyn ToolRunner>,
    mode: RunMode,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl RunContext {
    fn process_subject(&self, subject: &SubjectDescriptor) -> Vec<StepRecord> {
        let mut planned: BTreeSet<PathBuf> = BTreeSet::new();
        let mut failed: Option<StepName> = None;
        let mut records = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            let name = step.name();
            let logger = LogManager::scoped(&subject.id, name);
            let (status, reason) = match failed {
                Some(earlier) => (
                    StepStatus::Skipped,
                    Some(format!("earlier step {} failed", earlier)),
                ),
                None => {
                    let decision = panic::catch_unwind(AssertUnwindSafe(|| {
                        self.decide(step.as_ref(), subject, &mut planned, &logger)
                    }));
                    decision.unwrap_or_else(|payload| {
                        let reason = format!("step panicked: {}", panic_message(payload.as_ref()));
                        (StepStatus::Failed, Some(reason))
                    })
                }
            };

            match status {
                StepStatus::Succeeded => logger.record("succeeded"),
                StepStatus::Failed => {
                    logger.error(reason.as_deref().unwrap_or("failed"));
                    failed = Some(name);
                }
                StepStatus::Skipped => {
                    logger.record(&format!("skipped: {}", reason.as_deref().unwrap_or("")))
                }
                StepStatus::Pending => logger.record("would run"),
            }
            records.push(StepRecord::new(&subject.id, name, status, reason));
        }
        records
    }

    fn decide(
        &self,
        step: &dyn PipelineStep,
        subject: &SubjectDescriptor,
        planned: &mut BTreeSet<PathBuf>,
        logger: &LogManager,
    ) -> (StepStatus, Option<String>) {
        let exists = |path: &Path| planned.contains(path) || self.store.exists(path);

        let outputs = step.outputs(subject);
        if self.mode != RunMode::Force && !outputs.is_empty() && outputs.iter().all(|p| exists(p)) {
            return (StepStatus::Skipped, Some("output already exists".into()));
        }
        if let Err(reason) = step.validate(subject) {
            return (StepStatus::Skipped, Some(reason));
        }
        if let Some(missing) = step.inputs(subject).into_iter().find(|p| !exists(p)) {
            return (
                StepStatus::Skipped,
                Some(format!("missing input: {}", missing.display())),
            );
        }
        if self.mode == RunMode::DryRun {
            planned.extend(outputs);
            return (StepStatus::Pending, Some("would run".into()));
        }

        logger.detail("running");
        let ctx = StepContext {
            tools: self.tools.as_ref(),
            store: self.store.as_ref(),
        };
        match step.run(subject, &ctx) {
            Ok(()) => (StepStatus::Succeeded, None),
            Err(StepError::Validation(reason)) => (StepStatus::Skipped, Some(reason)),
            Err(err) => (StepStatus::Failed, Some(err.to_string())),
        }
    }

    /// Used when a worker dies without returning records. Step panics are
    /// caught in `process_subject`, so this only covers a lost task.
    fn abandon_subject(&self, subject: &SubjectDescriptor, reason: &str) -> Vec<StepRecord> {
        LogManager::scoped(&subject.id, "worker").error(reason);
        self.steps
            .iter()
            .map(|step| {
                let reason = Some(reason.to_string());
                StepRecord::new(&subject.id, step.name(), StepStatus::Failed, reason)
            })
            .collect()
    }
}

pub struct Orchestrator {
    steps: Vec<Arc<dyn PipelineStep>>,
    store: Arc<dyn ArtifactStore>,
    tools: Arc<dyn ToolRunner>,
    workers: usize,
}

impl Orchestrator {
    /// Steps are sorted into execution order; the filesystem and real
    /// subprocesses are used unless replaced.
    pub fn new(mut steps: Vec<Arc<dyn PipelineStep>>) -> Self {
        steps.sort_by_key(|step| step.name());
        Self {
            steps,
            store: Arc::new(FsArtifactStore),
            tools: Arc::new(ProcessRunner),
            workers: 1,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolRunner>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn step_names(&self) -> Vec<StepName> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Number of subjects whose outputs for each step are all present.
    pub fn materialized(&self, subjects: &[SubjectDescriptor]) -> BTreeMap<StepName, usize> {
        self.steps
            .iter()
            .map(|step| {
                let done = subjects
                    .iter()
                    .filter(|subject| {
                        step.outputs(subject)
                            .iter()
                            .all(|path| self.store.exists(path))
                    })
                    .count();
                (step.name(), done)
            })
            .collect()
    }

    pub fn run(&self, subjects: &[SubjectDescriptor], mode: RunMode) -> StepResult<RunSummary> {
        info!(
            "running {} step(s) for {} subject(s) with {} worker(s), mode {:?}",
            self.steps.len(),
            subjects.len(),
            self.workers,
            mode
        );
        let context = Arc::new(RunContext {
            steps: self.steps.clone(),
            store: Arc::clone(&self.store),
            tools: Arc::clone(&self.tools),
            mode,
        });

        let per_subject = if self.workers == 1 || subjects.len() <= 1 {
            subjects
                .iter()
                .map(|subject| context.process_subject(subject))
                .collect()
        } else {
            self.run_pool(&context, subjects)?
        };

        let records: Vec<StepRecord> = per_subject.into_iter().flatten().collect();
        Ok(RunSummary::from_records(records))
    }

    fn run_pool(
        &self,
        context: &Arc<RunContext>,
        subjects: &[SubjectDescriptor],
    ) -> StepResult<Vec<Vec<StepRecord>>> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.workers)
            .max_blocking_threads(self.workers)
            .thread_name("qnp-worker")
            .build()
            .map_err(|e| StepError::Internal(format!("cannot start worker pool: {}", e)))?;
        let permits = Arc::new(Semaphore::new(self.workers));

        runtime.block_on(async {
            let handles: Vec<_> = subjects
                .iter()
                .cloned()
                .map(|subject| {
                    let context = Arc::clone(context);
                    let permits = Arc::clone(&permits);
                    tokio::spawn(async move {
                        let _permit = permits
                            .acquire_owned()
                            .await
                            .map_err(|e| e.to_string())?;
                        tokio::task::spawn_blocking(move || context.process_subject(&subject))
                            .await
                            .map_err(|e| e.to_string())
                    })
                })
                .collect();

            let mut results = Vec::with_capacity(subjects.len());
            for (subject, handle) in subjects.iter().zip(handles) {
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => Err(e.to_string()),
                };
                results.push(match outcome {
                    Ok(records) => records,
                    Err(reason) => {
                        context.abandon_subject(subject, &format!("worker lost: {}", reason))
                    }
                });
            }
            Ok(results)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::subject::fixture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Ok,
        FailFor(&'static str),
        RejectFor(&'static str),
        PanicFor(&'static str),
    }

    /// Writes its outputs into the in-memory store when it runs.
    struct FakeStep {
        name: StepName,
        inputs: Vec<&'static str>,
        outputs: Vec<&'static str>,
        needs_calibration: bool,
        behaviour: Behaviour,
        store: Arc<MemoryArtifactStore>,
        runs: Arc<AtomicUsize>,
    }

    impl FakeStep {
        fn new(
            name: StepName,
            inputs: &[&'static str],
            outputs: &[&'static str],
            store: &Arc<MemoryArtifactStore>,
            runs: &Arc<AtomicUsize>,
        ) -> Self {
            Self {
                name,
                inputs: inputs.to_vec(),
                outputs: outputs.to_vec(),
                needs_calibration: false,
                behaviour: Behaviour::Ok,
                store: Arc::clone(store),
                runs: Arc::clone(runs),
            }
        }

        fn paths(subject: &SubjectDescriptor, names: &[&str]) -> Vec<PathBuf> {
            names.iter().map(|n| subject.output_dir.join(n)).collect()
        }
    }

    impl PipelineStep for FakeStep {
        fn name(&self) -> StepName {
            self.name
        }

        fn inputs(&self, subject: &SubjectDescriptor) -> Vec<PathBuf> {
            Self::paths(subject, &self.inputs)
        }

        fn outputs(&self, subject: &SubjectDescriptor) -> Vec<PathBuf> {
            Self::paths(subject, &self.outputs)
        }

        fn validate(&self, subject: &SubjectDescriptor) -> Result<(), String> {
            if self.needs_calibration && subject.calibration.is_none() {
                return Err(format!("no calibration entry for subject {}", subject.id));
            }
            Ok(())
        }

        fn run(&self, subject: &SubjectDescriptor, _ctx: &StepContext<'_>) -> StepResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::FailFor(id) if id == subject.id => {
                    return Err(StepError::Internal("simulated".into()))
                }
                Behaviour::RejectFor(id) if id == subject.id => {
                    return Err(StepError::Validation("nothing to do".into()))
                }
                Behaviour::PanicFor(id) if id == subject.id => panic!("step blew up"),
                _ => {}
            }
            for path in self.outputs(subject) {
                self.store.insert(path);
            }
            Ok(())
        }
    }

    struct Harness {
        store: Arc<MemoryArtifactStore>,
        runs: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryArtifactStore::new()),
                runs: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn step(
            &self,
            name: StepName,
            inputs: &[&'static str],
            outputs: &[&'static str],
        ) -> FakeStep {
            FakeStep::new(name, inputs, outputs, &self.store, &self.runs)
        }

        fn chain(&self) -> Vec<FakeStep> {
            vec![
                self.step(StepName::Extract, &[], &["tiles.csv"]),
                self.step(StepName::Transform, &["tiles.csv"], &["coords.csv"]),
            ]
        }

        fn orchestrator(&self, steps: Vec<FakeStep>) -> Orchestrator {
            let steps = steps
                .into_iter()
                .map(|s| Arc::new(s) as Arc<dyn PipelineStep>)
                .collect();
            Orchestrator::new(steps).with_store(self.store.clone())
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    fn subjects(ids: &[&str]) -> Vec<SubjectDescriptor> {
        ids.iter().map(|id| fixture(id, Path::new("/data"))).collect()
    }

    fn statuses(summary: &RunSummary) -> Vec<StepStatus> {
        summary.records.iter().map(|r| r.status).collect()
    }

    #[test]
    fn second_run_skips_everything() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator(harness.chain());
        let subjects = subjects(&["6966"]);

        let first = orchestrator.run(&subjects, RunMode::Normal).unwrap();
        assert_eq!(statuses(&first), vec![StepStatus::Succeeded, StepStatus::Succeeded]);

        let second = orchestrator.run(&subjects, RunMode::Normal).unwrap();
        assert_eq!(statuses(&second), vec![StepStatus::Skipped, StepStatus::Skipped]);
        assert!(second
            .records
            .iter()
            .all(|r| r.reason.as_deref() == Some("output already exists")));
        assert_eq!(harness.runs(), 2);
    }

    #[test]
    fn dry_run_plans_without_running() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator(harness.chain());
        let summary = orchestrator.run(&subjects(&["6966", "7038"]), RunMode::DryRun).unwrap();

        // Transform sees the planned tiles table as present.
        assert!(statuses(&summary).iter().all(|s| *s == StepStatus::Pending));
        assert_eq!(summary.overall.pending, 4);
        assert!(harness.store.is_empty());
        assert_eq!(harness.runs(), 0);
        assert!(!summary.has_failures());
    }

    #[test]
    fn force_reruns_materialized_steps() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator(harness.chain());
        let subjects = subjects(&["6966"]);
        orchestrator.run(&subjects, RunMode::Normal).unwrap();

        let forced = orchestrator.run(&subjects, RunMode::Force).unwrap();
        assert_eq!(statuses(&forced), vec![StepStatus::Succeeded, StepStatus::Succeeded]);
        assert_eq!(harness.runs(), 4);
    }

    #[test]
    fn failure_stops_only_that_subject() {
        let harness = Harness::new();
        let mut steps = harness.chain();
        steps[0].behaviour = Behaviour::FailFor("6966");
        let summary = harness
            .orchestrator(steps)
            .run(&subjects(&["6966", "7038"]), RunMode::Normal)
            .unwrap();

        let failed = summary.record("6966", StepName::Extract).unwrap();
        assert_eq!(failed.status, StepStatus::Failed);
        assert!(failed.reason.as_deref().unwrap().contains("simulated"));
        let after = summary.record("6966", StepName::Transform).unwrap();
        assert_eq!(after.status, StepStatus::Skipped);
        assert!(after.reason.as_deref().unwrap().contains("extract"));

        let other = summary.record("7038", StepName::Transform).unwrap();
        assert_eq!(other.status, StepStatus::Succeeded);
        assert!(summary.has_failures());
        assert_eq!(summary.counts(StepName::Extract).failed, 1);
    }

    #[test]
    fn missing_calibration_skips_only_that_subject() {
        let harness = Harness::new();
        let mut steps = harness.chain();
        steps[1].needs_calibration = true;
        let mut subjects = subjects(&["6966", "7038"]);
        subjects[0].calibration = None;

        let summary = harness.orchestrator(steps).run(&subjects, RunMode::Normal).unwrap();
        let skipped = summary.record("6966", StepName::Transform).unwrap();
        assert_eq!(skipped.status, StepStatus::Skipped);
        assert!(skipped.reason.as_deref().unwrap().contains("calibration"));
        let other = summary.record("7038", StepName::Transform).unwrap();
        assert_eq!(other.status, StepStatus::Succeeded);
        assert!(!summary.has_failures());
    }

    #[test]
    fn missing_input_is_reported() {
        let harness = Harness::new();
        let steps = vec![harness.step(StepName::Transform, &["tiles.csv"], &["coords.csv"])];
        let summary = harness
            .orchestrator(steps)
            .run(&subjects(&["6966"]), RunMode::Normal)
            .unwrap();
        let record = &summary.records[0];
        assert_eq!(record.status, StepStatus::Skipped);
        assert_eq!(record.reason.as_deref(), Some("missing input: /data/output/6966/tiles.csv"));
    }

    #[test]
    fn validation_error_from_run_is_a_skip() {
        let harness = Harness::new();
        let mut steps = harness.chain();
        steps[0].behaviour = Behaviour::RejectFor("6966");
        let summary = harness
            .orchestrator(steps)
            .run(&subjects(&["6966"]), RunMode::Normal)
            .unwrap();
        assert_eq!(summary.records[0].status, StepStatus::Skipped);
        assert_eq!(summary.records[0].reason.as_deref(), Some("nothing to do"));
        // Transform has no tiles table to read.
        assert!(summary.records[1].reason.as_deref().unwrap().starts_with("missing input"));
    }

    #[test]
    fn summary_is_independent_of_worker_count() {
        let ids = ["6966", "7038", "6981", "7004", "7010", "6999"];
        let mut outcomes = Vec::new();
        for workers in [1, 3] {
            let harness = Harness::new();
            let mut steps = harness.chain();
            steps[1].behaviour = Behaviour::FailFor("7004");
            let summary = harness
                .orchestrator(steps)
                .with_workers(workers)
                .run(&subjects(&ids), RunMode::Normal)
                .unwrap();
            outcomes.push((summary.records, summary.per_step));
        }
        assert_eq!(outcomes[0], outcomes[1]);
        let order: Vec<&str> = outcomes[1]
            .0
            .iter()
            .step_by(2)
            .map(|r| r.subject.as_str())
            .collect();
        assert_eq!(order, ids);
    }

    #[test]
    fn panicking_step_fails_its_subject() {
        let harness = Harness::new();
        let mut steps = harness.chain();
        steps[0].behaviour = Behaviour::PanicFor("7038");
        let summary = harness
            .orchestrator(steps)
            .with_workers(2)
            .run(&subjects(&["6966", "7038"]), RunMode::Normal)
            .unwrap();
        let done = summary.record("6966", StepName::Transform).unwrap();
        assert_eq!(done.status, StepStatus::Succeeded);
        let broken = summary.record("7038", StepName::Extract).unwrap();
        assert_eq!(broken.status, StepStatus::Failed);
        assert_eq!(broken.reason.as_deref(), Some("step panicked: step blew up"));
        let after = summary.record("7038", StepName::Transform).unwrap();
        assert_eq!(after.status, StepStatus::Skipped);
        assert_eq!(summary.counts(StepName::Extract).failed, 1);
        assert_eq!(summary.counts(StepName::Transform).failed, 0);
    }

    #[test]
    fn panic_in_later_step_keeps_earlier_outcomes() {
        let harness = Harness::new();
        let mut steps = harness.chain();
        steps[1].behaviour = Behaviour::PanicFor("7038");
        let summary = harness
            .orchestrator(steps)
            .with_workers(2)
            .run(&subjects(&["6966", "7038"]), RunMode::Normal)
            .unwrap();

        let extract = summary.record("7038", StepName::Extract).unwrap();
        assert_eq!(extract.status, StepStatus::Succeeded);
        let transform = summary.record("7038", StepName::Transform).unwrap();
        assert_eq!(transform.status, StepStatus::Failed);

        let counts = summary.counts(StepName::Extract);
        assert_eq!((counts.succeeded, counts.failed), (2, 0));
        assert_eq!(summary.counts(StepName::Transform).failed, 1);
        assert_eq!(summary.records.len(), 4);
        assert_eq!(summary.overall.total(), summary.records.len());
    }

    #[test]
    fn sequential_run_survives_a_panicking_step() {
        let harness = Harness::new();
        let mut steps = harness.chain();
        steps[0].behaviour = Behaviour::PanicFor("6966");
        let summary = harness
            .orchestrator(steps)
            .run(&subjects(&["6966", "7038"]), RunMode::Normal)
            .unwrap();

        assert_eq!(
            statuses(&summary),
            vec![
                StepStatus::Failed,
                StepStatus::Skipped,
                StepStatus::Succeeded,
                StepStatus::Succeeded,
            ]
        );
        assert!(summary.has_failures());
        assert_eq!(summary.overall.total(), 4);
    }

    #[test]
    fn materialized_counts_subjects_with_outputs() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator(harness.chain());
        let subjects = subjects(&["6966", "7038"]);
        orchestrator.run(&subjects[..1], RunMode::Normal).unwrap();
        let counts = orchestrator.materialized(&subjects);
        assert_eq!(counts[&StepName::Extract], 1);
        assert_eq!(counts[&StepName::Transform], 1);
    }
}
