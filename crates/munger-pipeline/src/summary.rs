//! Run counters.

use std::collections::BTreeMap;
use std::fmt;

use munger_types::{DestinationId, RecordOutcome, Stage, StageStatus};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    pub passed: u64,
    pub failed: u64,
    pub not_run: u64,
}

/// Totals for one run. Returned by the run controller and printed by the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Records read from the input.
    pub input: u64,
    pub filtered_out: u64,
    /// Records whose coerce stage produced at least one diagnostic.
    pub coercion_errors: u64,
    pub validation_failed: u64,
    pub fully_passed: u64,
    /// Records no hook binding matched.
    pub unrouted: u64,
    /// Writes dropped under the `skip` write-error policy.
    pub write_errors: u64,
    pub cancelled: bool,
    pub stages: BTreeMap<Stage, StageCounts>,
    /// Successful writes per destination.
    pub destinations: BTreeMap<DestinationId, u64>,
}

impl RunSummary {
    /// Count one processed record.
    pub fn record_outcome(&mut self, outcome: &RecordOutcome) {
        self.input += 1;
        if outcome.status(Stage::Filter) == StageStatus::Failed {
            self.filtered_out += 1;
        }
        if outcome
            .stage(Stage::Coerce)
            .is_some_and(|s| !s.diagnostics.is_empty())
        {
            self.coercion_errors += 1;
        }
        if outcome.status(Stage::Validate) == StageStatus::Failed {
            self.validation_failed += 1;
        }
        if outcome.fully_passed() {
            self.fully_passed += 1;
        }
        for stage in Stage::ALL {
            let status = outcome.status(stage);
            if status == StageStatus::Absent {
                continue;
            }
            let counts = self.stages.entry(stage).or_default();
            match status {
                StageStatus::Passed => counts.passed += 1,
                StageStatus::Failed => counts.failed += 1,
                StageStatus::NotRun | StageStatus::Absent => counts.not_run += 1,
            }
        }
    }

    pub fn record_write(&mut self, destination: &str) {
        *self.destinations.entry(destination.to_string()).or_default() += 1;
    }

    pub fn written(&self, destination: &str) -> u64 {
        self.destinations.get(destination).copied().unwrap_or(0)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records: {} fully passed, {} filtered out, {} with coercion errors, {} failed validation, {} unrouted",
            self.input,
            self.fully_passed,
            self.filtered_out,
            self.coercion_errors,
            self.validation_failed,
            self.unrouted
        )?;
        if self.write_errors > 0 {
            write!(f, ", {} write errors", self.write_errors)?;
        }
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}
