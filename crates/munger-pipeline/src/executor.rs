//! Stage executors: run one compiled stage against one record.
//!
//! Rule functions are user code. A panic inside one is contained here, turned
//! into a `FunctionPanicked` diagnostic and counted as that rule's failure.

use std::panic::{catch_unwind, AssertUnwindSafe};

use munger_types::{Diagnostic, DiagnosticKind, Record, Stage, StageOutcome};

use crate::compiler::{CompiledRule, CompiledStage, RuleAction};
use crate::registry::{Check, RuleResult, Transform};

/// Why a rule call did not succeed.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Failure {
    Rejected(String),
    Panicked(String),
}

/// Call `f`, converting a panic into [`Failure::Panicked`].
pub(crate) fn call<T>(f: impl FnOnce() -> RuleResult<T>) -> Result<T, Failure> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(message)) => Err(Failure::Rejected(message)),
        Err(payload) => {
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            };
            Err(Failure::Panicked(message))
        }
    }
}

/// [`call`] with the panic folded into the error message.
pub(crate) fn guarded<T>(f: impl FnOnce() -> RuleResult<T>) -> RuleResult<T> {
    call(f).map_err(|failure| match failure {
        Failure::Rejected(message) => message,
        Failure::Panicked(message) => format!("panicked: {message}"),
    })
}

/// `record` is the record as the failing rule saw it; a failed rule never
/// changes it.
fn diagnostic(kind: DiagnosticKind, rule: &CompiledRule, record: &Record, failure: Failure) -> Diagnostic {
    let (kind, message) = match failure {
        Failure::Rejected(message) => (kind, message),
        Failure::Panicked(message) => {
            let input = rule.field.as_deref().and_then(|name| record.get(name));
            tracing::warn!(
                stage = %rule.stage,
                rule = %rule.label(),
                index = record.index,
                input = ?input,
                "Rule function panicked: {message}"
            );
            let message = match input {
                Some(value) => format!("panicked on input {value}: {message}"),
                None => format!("panicked: {message}"),
            };
            (DiagnosticKind::FunctionPanicked, message)
        }
    };
    Diagnostic::new(kind, rule.field.as_deref(), rule.label(), message).with_required(rule.required)
}

/// Evaluate a predicate rule. A field check on a missing field passes.
fn evaluate(rule: &CompiledRule, record: &Record) -> Result<(), Failure> {
    let RuleAction::Check(check) = &rule.action else {
        return Ok(());
    };
    match check {
        Check::Field(f) => match rule.field.as_deref().and_then(|name| record.get(name)) {
            Some(value) => call(|| f(value)),
            None => Ok(()),
        },
        Check::Record(f) => call(|| f(rule.field.as_deref(), &record.fields)),
    }
}

fn run_checks(stage: &CompiledStage, record: &Record, kind: DiagnosticKind) -> StageOutcome {
    let mut outcome = StageOutcome::new(stage.stage);
    for rule in &stage.rules {
        if let Err(failure) = evaluate(rule, record) {
            outcome.push(diagnostic(kind, rule, record, failure));
        }
    }
    outcome
}

/// Filter stage. Only required rules can exclude a record; other failures are
/// recorded as advisory diagnostics.
pub fn run_filter(stage: &CompiledStage, record: &Record) -> StageOutcome {
    debug_assert_eq!(stage.stage, Stage::Filter);
    run_checks(stage, record, DiagnosticKind::FilterRejected)
}

/// Validate stage. Every failing rule leaves a diagnostic; the stage fails
/// when a required rule fails.
pub fn run_validate(stage: &CompiledStage, record: &Record) -> StageOutcome {
    debug_assert_eq!(stage.stage, Stage::Validate);
    run_checks(stage, record, DiagnosticKind::ValidationFailure)
}

/// Coerce stage. Rules run in order against the evolving record. A failing
/// rule leaves the record as it was before that rule and the next rule runs.
pub fn run_coerce(stage: &CompiledStage, record: &mut Record) -> StageOutcome {
    debug_assert_eq!(stage.stage, Stage::Coerce);
    let mut outcome = StageOutcome::new(Stage::Coerce);
    for rule in &stage.rules {
        let RuleAction::Transform(transform) = &rule.action else {
            continue;
        };
        let result = match transform {
            Transform::Field(f) => {
                let Some(name) = rule.field.as_deref() else {
                    continue;
                };
                let Some(current) = record.get(name) else {
                    continue;
                };
                call(|| f(current)).map(|value| record.set(name, value))
            }
            Transform::Record(f) => {
                let mut scratch = record.fields.clone();
                call(|| f(rule.field.as_deref(), &mut scratch)).map(|()| record.fields = scratch)
            }
        };
        if let Err(failure) = result {
            outcome.push(diagnostic(DiagnosticKind::CoercionError, rule, record, failure));
        }
    }
    outcome
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
