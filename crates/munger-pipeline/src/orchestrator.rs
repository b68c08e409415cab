//! Pipeline orchestrator: drives one record through filter, coerce and
//! validate, honouring short-circuits.

use munger_types::{Record, RecordOutcome, Stage, StageOutcome};
use serde::{Deserialize, Serialize};

use crate::compiler::CompiledSchema;
use crate::executor::{run_coerce, run_filter, run_validate};

/// Short-circuit switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// A failed filter stage ends the record's run. Later stages are `NotRun`.
    pub filter_terminates: bool,
    /// A failed coerce stage ends the record's run. Validation is `NotRun`.
    pub halt_on_coercion_failure: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            filter_terminates: true,
            halt_on_coercion_failure: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Run(Stage),
    Done,
}

/// Owns a compiled schema and applies it to records one at a time.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    schema: CompiledSchema,
    options: PipelineOptions,
}

impl Orchestrator {
    pub fn new(schema: CompiledSchema, options: PipelineOptions) -> Self {
        Self { schema, options }
    }

    pub fn schema(&self) -> &CompiledSchema {
        &self.schema
    }

    pub fn options(&self) -> PipelineOptions {
        self.options
    }

    /// Run every configured stage in order. Always yields exactly one outcome.
    pub fn process(&self, mut record: Record) -> RecordOutcome {
        let mut stages: Vec<StageOutcome> = Vec::new();
        let mut step = self.next_after(None);

        while let Step::Run(stage) = step {
            let Some(compiled) = self.schema.stage(stage) else {
                step = self.next_after(Some(stage));
                continue;
            };
            let outcome = match stage {
                Stage::Filter => run_filter(compiled, &record),
                Stage::Coerce => run_coerce(compiled, &mut record),
                Stage::Validate => run_validate(compiled, &record),
            };
            let terminate = !outcome.passed && self.terminates(stage);
            stages.push(outcome);
            step = if terminate {
                Step::Done
            } else {
                self.next_after(Some(stage))
            };
        }

        let ran: Vec<Stage> = stages.iter().map(|s| s.stage).collect();
        let not_run = self
            .schema
            .configured()
            .into_iter()
            .filter(|s| !ran.contains(s))
            .collect();

        let mut outcome = RecordOutcome::new(record);
        outcome.stages = stages;
        outcome.not_run = not_run;
        outcome
    }

    fn terminates(&self, stage: Stage) -> bool {
        match stage {
            Stage::Filter => self.options.filter_terminates,
            Stage::Coerce => self.options.halt_on_coercion_failure,
            Stage::Validate => false,
        }
    }

    /// The next configured stage after `current`, or `Done`.
    fn next_after(&self, current: Option<Stage>) -> Step {
        Stage::ALL
            .into_iter()
            .filter(|s| current.map_or(true, |c| *s > c))
            .find(|s| self.schema.has_stage(*s))
            .map_or(Step::Done, Step::Run)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
