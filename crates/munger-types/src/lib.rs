//! Shared types, errors, records, and outcomes for the munger record pipeline.
//!
//! This crate provides the foundational types used across all other munger crates:
//! - `MungerError` — unified error taxonomy
//! - `Record` — one input row with its position in the stream
//! - `Stage` / `StageStatus` — the three pipeline stages and how each ended for a record
//! - `Diagnostic`, `StageOutcome`, `RecordOutcome` — per-record results handed to routing

use std::fmt;

use serde::{Deserialize, Serialize};

/// Field values. Everything arrives as a string; coercion may produce numbers,
/// booleans or null.
pub use serde_json::Value;

/// Ordered field-name to value mapping. Insertion order is preserved, so a
/// record keeps its input column order and new fields land at the end.
pub type Fields = serde_json::Map<String, Value>;

/// Identifier of an output sink. Opaque to the core; resolved by the caller.
pub type DestinationId = String;

/// Unified error type for all munger subsystems.
#[derive(Debug, thiserror::Error)]
pub enum MungerError {
    // === Setup Errors ===
    #[error("Schema compile error: {0}")]
    SchemaCompile(String),

    #[error("Unknown {kind} function '{name}'")]
    UnknownRuleFunction { kind: FunctionKind, name: String },

    #[error("{kind} function '{name}' is already registered")]
    DuplicateRegistration { kind: FunctionKind, name: String },

    #[error("Invalid hook binding: {0}")]
    InvalidHook(String),

    #[error("No stages configured: set at least one of filter, coerce or validate")]
    NoStagesConfigured,

    // === Run Errors ===
    #[error("Write to '{destination}' failed for record {index}: {message}")]
    Write {
        destination: String,
        index: u64,
        message: String,
    },

    #[error("Input error at record {index}: {message}")]
    Input { index: u64, message: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl MungerError {
    /// Returns `true` for errors raised while assembling a pipeline. These halt
    /// before any record is read.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            MungerError::SchemaCompile(_)
                | MungerError::UnknownRuleFunction { .. }
                | MungerError::DuplicateRegistration { .. }
                | MungerError::InvalidHook(_)
                | MungerError::NoStagesConfigured
        )
    }
}

/// A convenience alias for `Result<T, MungerError>`.
pub type Result<T> = std::result::Result<T, MungerError>;

// ---------------------------------------------------------------------------
// FunctionKind — the two families of registry entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    /// Rewrites a field (or the record) during the coerce stage.
    Coercion,
    /// Checks a field (or the record) during the filter and validate stages.
    Predicate,
}

impl FunctionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionKind::Coercion => "coercion",
            FunctionKind::Predicate => "predicate",
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Stage / StageStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Filter,
    Coerce,
    Validate,
}

impl Stage {
    /// Stages in execution order.
    pub const ALL: [Stage; 3] = [Stage::Filter, Stage::Coerce, Stage::Validate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Filter => "filter",
            Stage::Coerce => "coerce",
            Stage::Validate => "validate",
        }
    }

    /// The registry family this stage draws its rule functions from.
    pub fn function_kind(&self) -> FunctionKind {
        match self {
            Stage::Coerce => FunctionKind::Coercion,
            Stage::Filter | Stage::Validate => FunctionKind::Predicate,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a stage ended for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    Failed,
    /// The stage is configured but an earlier stage short-circuited the record.
    NotRun,
    /// No schema is registered for the stage.
    Absent,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Passed => "passed",
            StageStatus::Failed => "failed",
            StageStatus::NotRun => "not_run",
            StageStatus::Absent => "absent",
        }
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One row of input. `index` is the 0-based position in the input stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub index: u64,
    pub fields: Fields,
}

impl Record {
    pub fn new(index: u64, fields: Fields) -> Self {
        Self { index, fields }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Insert or overwrite a field. New fields are appended.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Field value rendered as text. Missing fields render as `None`.
    pub fn text(&self, field: &str) -> Option<String> {
        self.fields.get(field).map(value_to_text)
    }
}

/// Render a value the way it would appear in a text cell: strings verbatim,
/// null as empty, everything else in its JSON form.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    FilterRejected,
    CoercionError,
    ValidationFailure,
    /// A rule function panicked; the panic was contained and counted as the
    /// rule's failure.
    FunctionPanicked,
}

/// One failed rule on one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub field: Option<String>,
    pub rule: String,
    pub message: String,
    pub kind: DiagnosticKind,
    pub required: bool,
}

impl Diagnostic {
    pub fn new(
        kind: DiagnosticKind,
        field: Option<&str>,
        rule: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.map(String::from),
            rule: rule.into(),
            message: message.into(),
            kind,
            required: false,
        }
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.field {
            Some(ref field) => write!(f, "{field}: {} [{}]", self.message, self.rule),
            None => write!(f, "{} [{}]", self.message, self.rule),
        }
    }
}

// ---------------------------------------------------------------------------
// StageOutcome — result of one stage on one record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub passed: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl StageOutcome {
    /// A passing outcome with no diagnostics; failures are added with [`push`](Self::push).
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            passed: true,
            diagnostics: Vec::new(),
        }
    }

    /// Record a failed rule. Only required failures flip the stage to failed.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        if diagnostic.required {
            self.passed = false;
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn status(&self) -> StageStatus {
        if self.passed {
            StageStatus::Passed
        } else {
            StageStatus::Failed
        }
    }
}

// ---------------------------------------------------------------------------
// RecordOutcome — everything routing needs to know about a record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordOutcome {
    /// The final record value: coerced if the coerce stage ran, original otherwise.
    pub record: Record,
    /// Outcomes of the stages that ran, in execution order.
    pub stages: Vec<StageOutcome>,
    /// Configured stages skipped by a short-circuit.
    pub not_run: Vec<Stage>,
}

impl RecordOutcome {
    pub fn new(record: Record) -> Self {
        Self {
            record,
            stages: Vec::new(),
            not_run: Vec::new(),
        }
    }

    pub fn index(&self) -> u64 {
        self.record.index
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        if let Some(outcome) = self.stage(stage) {
            outcome.status()
        } else if self.not_run.contains(&stage) {
            StageStatus::NotRun
        } else {
            StageStatus::Absent
        }
    }

    /// All diagnostics across stages, in stage order.
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.stages.iter().flat_map(|s| s.diagnostics.iter())
    }

    pub fn any_failed(&self) -> bool {
        self.stages.iter().any(|s| !s.passed)
    }

    /// At least one stage ran, none failed and none was skipped.
    pub fn fully_passed(&self) -> bool {
        !self.stages.is_empty() && !self.any_failed() && self.not_run.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    fn required_failure(stage_kind: DiagnosticKind) -> Diagnostic {
        Diagnostic::new(stage_kind, Some("amount"), "greater_than", "must be greater than 0")
            .with_required(true)
    }

    // --- MungerError display ---

    #[test]
    fn error_display_schema_compile() {
        let err = MungerError::SchemaCompile("coerce rule 1 on 'amount': unknown function".into());
        assert_eq!(
            err.to_string(),
            "Schema compile error: coerce rule 1 on 'amount': unknown function"
        );
    }

    #[test]
    fn error_display_unknown_function() {
        let err = MungerError::UnknownRuleFunction {
            kind: FunctionKind::Coercion,
            name: "to_roman".into(),
        };
        assert_eq!(err.to_string(), "Unknown coercion function 'to_roman'");
    }

    #[test]
    fn error_display_duplicate_registration() {
        let err = MungerError::DuplicateRegistration {
            kind: FunctionKind::Predicate,
            name: "equals".into(),
        };
        assert_eq!(err.to_string(), "predicate function 'equals' is already registered");
    }

    #[test]
    fn error_display_write() {
        let err = MungerError::Write {
            destination: "clean.csv".into(),
            index: 7,
            message: "disk full".into(),
        };
        assert_eq!(
            err.to_string(),
            "Write to 'clean.csv' failed for record 7: disk full"
        );
    }

    #[test]
    fn error_display_other() {
        let err = MungerError::Other("something went wrong".into());
        assert_eq!(err.to_string(), "something went wrong");
    }

    // --- is_setup_error ---

    #[test]
    fn setup_errors_are_flagged() {
        assert!(MungerError::SchemaCompile("x".into()).is_setup_error());
        assert!(MungerError::NoStagesConfigured.is_setup_error());
        assert!(MungerError::InvalidHook("x".into()).is_setup_error());
        assert!(MungerError::UnknownRuleFunction {
            kind: FunctionKind::Predicate,
            name: "x".into(),
        }
        .is_setup_error());
    }

    #[test]
    fn run_errors_are_not_setup_errors() {
        let err = MungerError::Write {
            destination: "d".into(),
            index: 0,
            message: "m".into(),
        };
        assert!(!err.is_setup_error());
        assert!(!MungerError::Other("x".into()).is_setup_error());
    }

    // --- From impls ---

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: MungerError = io_err.into();
        assert!(matches!(err, MungerError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<Value>("not json").unwrap_err();
        let err: MungerError = json_err.into();
        assert!(matches!(err, MungerError::Json(_)));
    }

    // --- Stage / StageStatus ---

    #[test]
    fn stage_order_and_kinds() {
        assert_eq!(Stage::ALL, [Stage::Filter, Stage::Coerce, Stage::Validate]);
        assert_eq!(Stage::Filter.function_kind(), FunctionKind::Predicate);
        assert_eq!(Stage::Coerce.function_kind(), FunctionKind::Coercion);
        assert_eq!(Stage::Validate.function_kind(), FunctionKind::Predicate);
    }

    #[test]
    fn stage_status_serializes_to_snake_case() {
        assert_eq!(serde_json::to_string(&StageStatus::NotRun).unwrap(), "\"not_run\"");
        assert_eq!(serde_json::to_string(&StageStatus::Absent).unwrap(), "\"absent\"");
        let status: StageStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(status, StageStatus::Failed);
    }

    // --- Record ---

    #[test]
    fn record_set_appends_new_fields_in_order() {
        let mut record = Record::new(0, fields(&[("b", "1"), ("a", "2")]));
        record.set("c", json!(3));
        let keys: Vec<_> = record.fields.keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn record_text_renders_values() {
        let mut record = Record::new(3, fields(&[("name", "fish")]));
        record.set("amount", json!(12.5));
        record.set("nothing", Value::Null);
        assert_eq!(record.text("name").as_deref(), Some("fish"));
        assert_eq!(record.text("amount").as_deref(), Some("12.5"));
        assert_eq!(record.text("nothing").as_deref(), Some(""));
        assert_eq!(record.text("missing"), None);
    }

    // --- StageOutcome ---

    #[test]
    fn optional_failures_do_not_fail_the_stage() {
        let mut outcome = StageOutcome::new(Stage::Validate);
        outcome.push(Diagnostic::new(
            DiagnosticKind::ValidationFailure,
            Some("code"),
            "is_upper",
            "Should be uppercase",
        ));
        assert!(outcome.passed);
        assert_eq!(outcome.diagnostics.len(), 1);
    }

    #[test]
    fn required_failure_fails_the_stage() {
        let mut outcome = StageOutcome::new(Stage::Validate);
        outcome.push(required_failure(DiagnosticKind::ValidationFailure));
        assert!(!outcome.passed);
        assert_eq!(outcome.status(), StageStatus::Failed);
    }

    #[test]
    fn diagnostic_display_includes_field_and_rule() {
        let diag = required_failure(DiagnosticKind::ValidationFailure);
        assert_eq!(diag.to_string(), "amount: must be greater than 0 [greater_than]");
        let record_level = Diagnostic::new(
            DiagnosticKind::FilterRejected,
            None,
            "fields_differ",
            "fields are equal",
        );
        assert_eq!(record_level.to_string(), "fields are equal [fields_differ]");
    }

    // --- RecordOutcome ---

    #[test]
    fn record_outcome_distinguishes_not_run_from_absent() {
        let mut outcome = RecordOutcome::new(Record::new(0, Fields::new()));
        let mut filter = StageOutcome::new(Stage::Filter);
        filter.push(required_failure(DiagnosticKind::FilterRejected));
        outcome.stages.push(filter);
        outcome.not_run.push(Stage::Validate);

        assert_eq!(outcome.status(Stage::Filter), StageStatus::Failed);
        assert_eq!(outcome.status(Stage::Coerce), StageStatus::Absent);
        assert_eq!(outcome.status(Stage::Validate), StageStatus::NotRun);
        assert!(outcome.any_failed());
        assert!(!outcome.fully_passed());
    }

    #[test]
    fn record_outcome_with_no_stages_is_not_fully_passed() {
        let outcome = RecordOutcome::new(Record::new(0, Fields::new()));
        assert!(!outcome.fully_passed());
    }

    #[test]
    fn record_outcome_collects_diagnostics_in_stage_order() {
        let mut outcome = RecordOutcome::new(Record::new(0, Fields::new()));
        let mut coerce = StageOutcome::new(Stage::Coerce);
        coerce.push(Diagnostic::new(
            DiagnosticKind::CoercionError,
            Some("date"),
            "datetime_to_format",
            "unparsable date",
        ));
        let mut validate = StageOutcome::new(Stage::Validate);
        validate.push(required_failure(DiagnosticKind::ValidationFailure));
        outcome.stages.push(coerce);
        outcome.stages.push(validate);

        let rules: Vec<_> = outcome.diagnostics().map(|d| d.rule.as_str()).collect();
        assert_eq!(rules, vec!["datetime_to_format", "greater_than"]);
    }

    #[test]
    fn record_outcome_serializes() {
        let outcome = RecordOutcome::new(Record::new(4, fields(&[("a", "1")])));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["record"]["index"], json!(4));
        assert_eq!(json["record"]["fields"]["a"], json!("1"));
    }
}
