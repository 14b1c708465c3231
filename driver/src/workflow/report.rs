use anyhow::Context;
use qnpcore::orchestrator::{RunSummary, StepName, StepStatus};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

const MAX_LISTED: usize = 10;

pub fn format_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    for record in &summary.records {
        if matches!(record.status, StepStatus::Failed | StepStatus::Pending) {
            let _ = writeln!(
                out,
                "{:<8} {:<16} {:<9} {}",
                record.subject,
                record.step,
                record.status,
                record.reason.as_deref().unwrap_or("")
            );
        }
    }
    let _ = writeln!(
        out,
        "{:<16} {:>9} {:>8} {:>7} {:>8}",
        "step", "succeeded", "skipped", "failed", "pending"
    );
    for (step, counts) in &summary.per_step {
        let _ = writeln!(
            out,
            "{:<16} {:>9} {:>8} {:>7} {:>8}",
            step, counts.succeeded, counts.skipped, counts.failed, counts.pending
        );
    }
    let total = summary.overall;
    let _ = write!(
        out,
        "total: {} succeeded, {} skipped, {} failed, {} pending",
        total.succeeded, total.skipped, total.failed, total.pending
    );
    out
}

pub fn format_info(materialized: &BTreeMap<StepName, usize>, subjects: usize) -> String {
    materialized
        .iter()
        .map(|(step, done)| {
            format!("{:<16} {}/{} subjects materialized", step.as_str(), done, subjects)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_missing(missing: &[PathBuf]) -> String {
    let mut out = String::new();
    for path in missing.iter().take(MAX_LISTED) {
        let _ = writeln!(out, "missing: {}", path.display());
    }
    if missing.len() > MAX_LISTED {
        let _ = writeln!(out, "... and {} more", missing.len() - MAX_LISTED);
    }
    let _ = write!(out, "{} missing input file(s)", missing.len());
    out
}

pub fn write_json(path: &Path, summary: &RunSummary) -> anyhow::Result<()> {
    let json = summary.to_json().context("serializing run summary")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, json).with_context(|| format!("writing summary {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use qnpcore::orchestrator::StepRecord;

    fn summary() -> RunSummary {
        RunSummary::from_records(vec![
            StepRecord::new("6966", StepName::Extract, StepStatus::Succeeded, None),
            StepRecord::new(
                "6966",
                StepName::Transform,
                StepStatus::Failed,
                Some("bad table".into()),
            ),
            StepRecord::new(
                "7038",
                StepName::Extract,
                StepStatus::Skipped,
                Some("output already exists".into()),
            ),
        ])
    }

    #[test]
    fn failures_are_listed_before_totals() {
        let text = format_summary(&summary());
        assert!(text.contains("bad table"));
        assert!(!text.contains("output already exists"));
        assert!(text.ends_with("total: 1 succeeded, 1 skipped, 1 failed, 0 pending"));
    }

    #[test]
    fn long_missing_lists_are_truncated() {
        let missing: Vec<PathBuf> = (0..13)
            .map(|i| PathBuf::from(format!("/in/{}.mgz", i)))
            .collect();
        let text = format_missing(&missing);
        assert_eq!(text.lines().filter(|l| l.starts_with("missing:")).count(), 10);
        assert!(text.contains("... and 3 more"));
        assert!(text.ends_with("13 missing input file(s)"));
    }

    #[test]
    fn json_summary_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/summary.json");
        write_json(&path, &summary()).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["overall"]["failed"], 1);
        assert_eq!(value["records"][1]["step"], "transform");
    }
}
