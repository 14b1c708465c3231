use crate::orchestrator::step::StepName;
use crate::telemetry::StepCounts;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Would run; only produced by dry runs.
    Pending,
    Skipped,
    Succeeded,
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StepStatus::Pending => "pending",
            StepStatus::Skipped => "skipped",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
        };
        f.pad(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub subject: String,
    pub step: StepName,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StepRecord {
    pub fn new(subject: &str, step: StepName, status: StepStatus, reason: Option<String>) -> Self {
        Self {
            subject: subject.to_string(),
            step,
            status,
            reason,
        }
    }
}

/// Outcome of one orchestrator run, records in subject input order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub records: Vec<StepRecord>,
    pub per_step: BTreeMap<StepName, StepCounts>,
    pub overall: StepCounts,
}

impl RunSummary {
    pub fn new(records: Vec<StepRecord>, per_step: BTreeMap<StepName, StepCounts>) -> Self {
        let mut overall = StepCounts::default();
        per_step.values().for_each(|counts| overall.merge(counts));
        Self {
            records,
            per_step,
            overall,
        }
    }

    /// Tallies computed directly from `records`.
    pub fn from_records(records: Vec<StepRecord>) -> Self {
        let mut per_step: BTreeMap<StepName, StepCounts> = BTreeMap::new();
        for record in &records {
            per_step.entry(record.step).or_default().add(record.status);
        }
        Self::new(records, per_step)
    }

    pub fn counts(&self, step: StepName) -> StepCounts {
        self.per_step.get(&step).copied().unwrap_or_default()
    }

    pub fn has_failures(&self) -> bool {
        self.overall.failed > 0
    }

    pub fn record(&self, subject: &str, step: StepName) -> Option<&StepRecord> {
        self.records
            .iter()
            .find(|record| record.subject == subject && record.step == step)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_totals_follow_records() {
        let summary = RunSummary::from_records(vec![
            StepRecord::new("6966", StepName::Extract, StepStatus::Succeeded, None),
            StepRecord::new("6966", StepName::Transform, StepStatus::Failed, Some("boom".into())),
            StepRecord::new("7038", StepName::Extract, StepStatus::Skipped, Some("done".into())),
        ]);
        assert!(summary.has_failures());
        assert_eq!(summary.counts(StepName::Extract).total(), 2);
        assert_eq!(summary.overall.total(), 3);
        assert_eq!(summary.record("6966", StepName::Transform).unwrap().status, StepStatus::Failed);
    }

    #[test]
    fn summary_serializes_with_step_names() {
        let summary = RunSummary::from_records(vec![StepRecord::new(
            "6966",
            StepName::ApplyTransform,
            StepStatus::Pending,
            None,
        )]);
        let json = summary.to_json().unwrap();
        assert!(json.contains("\"apply_transform\""));
        assert!(json.contains("\"pending\""));
        assert!(!json.contains("reason"));
    }
}
