use crate::orchestrator::StepStatus;
use serde::Serialize;

/// Outcome tallies for one step, or for a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StepCounts {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub pending: usize,
}

impl StepCounts {
    pub fn add(&mut self, status: StepStatus) {
        match status {
            StepStatus::Succeeded => self.succeeded += 1,
            StepStatus::Skipped => self.skipped += 1,
            StepStatus::Failed => self.failed += 1,
            StepStatus::Pending => self.pending += 1,
        }
    }

    pub fn merge(&mut self, other: &StepCounts) {
        self.succeeded += other.succeeded;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.pending += other.pending;
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed + self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate_and_merge() {
        let mut extract = StepCounts::default();
        extract.add(StepStatus::Succeeded);
        extract.add(StepStatus::Failed);
        let mut smooth = StepCounts::default();
        smooth.add(StepStatus::Skipped);

        extract.merge(&smooth);
        assert_eq!((extract.succeeded, extract.failed, extract.skipped), (1, 1, 1));
        assert_eq!(extract.total(), 3);
        assert_eq!(smooth.pending, 0);
    }
}
