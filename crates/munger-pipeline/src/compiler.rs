//! Schema compiler: resolves every rule against the registry and binds its
//! arguments.
//!
//! Call [`lint`] for the full list of issues or [`compile`] to fail on the
//! first `Error`-severity issue set. Compilation never touches record data.

use std::fmt;

use munger_types::{FunctionKind, MungerError, Result, Stage, Value};

use crate::executor::guarded;
use crate::registry::{Check, FunctionRegistry, RuleFunction, Transform};
use crate::schema::{RuleSpec, SchemaDef, StageDef};

// ---------------------------------------------------------------------------
// Issues
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
        })
    }
}

/// One problem found while compiling a schema.
#[derive(Debug, Clone)]
pub struct SchemaIssue {
    /// Machine-readable issue code, e.g. `unknown_function`.
    pub code: &'static str,
    pub severity: Severity,
    pub message: String,
    pub stage: Stage,
    pub field: Option<String>,
    pub fix: Option<String>,
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.code, self.message)
    }
}

// ---------------------------------------------------------------------------
// Compiled form
// ---------------------------------------------------------------------------

/// A rule's bound callable.
#[derive(Clone)]
pub enum RuleAction {
    Transform(Transform),
    Check(Check),
}

#[derive(Clone)]
pub struct CompiledRule {
    pub stage: Stage,
    pub field: Option<String>,
    pub function: String,
    pub args: Vec<Value>,
    pub required: bool,
    pub action: RuleAction,
}

impl CompiledRule {
    /// The rule as written, `function(args)`.
    pub fn label(&self) -> String {
        RuleSpec {
            field: self.field.clone(),
            function: self.function.clone(),
            args: self.args.clone(),
            required: self.required,
        }
        .describe()
    }
}

impl fmt::Debug for CompiledRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRule")
            .field("stage", &self.stage)
            .field("field", &self.field)
            .field("function", &self.function)
            .field("args", &self.args)
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct CompiledStage {
    pub stage: Stage,
    pub shape: Option<Vec<String>>,
    pub rules: Vec<CompiledRule>,
}

/// One ordered rule list per configured stage.
#[derive(Debug, Clone, Default)]
pub struct CompiledSchema {
    filter: Option<CompiledStage>,
    coerce: Option<CompiledStage>,
    validate: Option<CompiledStage>,
}

impl CompiledSchema {
    pub fn stage(&self, stage: Stage) -> Option<&CompiledStage> {
        match stage {
            Stage::Filter => self.filter.as_ref(),
            Stage::Coerce => self.coerce.as_ref(),
            Stage::Validate => self.validate.as_ref(),
        }
    }

    pub fn has_stage(&self, stage: Stage) -> bool {
        self.stage(stage).is_some()
    }

    /// Configured stages in execution order.
    pub fn configured(&self) -> Vec<Stage> {
        Stage::ALL.into_iter().filter(|s| self.has_stage(*s)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.configured().is_empty()
    }

    fn insert(&mut self, compiled: CompiledStage) {
        let slot = match compiled.stage {
            Stage::Filter => &mut self.filter,
            Stage::Coerce => &mut self.coerce,
            Stage::Validate => &mut self.validate,
        };
        *slot = Some(compiled);
    }
}

// ---------------------------------------------------------------------------
// Lint / compile
// ---------------------------------------------------------------------------

/// Check every rule of every stage and report all issues found.
pub fn lint(schema: &SchemaDef, registry: &FunctionRegistry) -> Vec<SchemaIssue> {
    analyze(schema, registry).1
}

/// Compile a schema. Fails with `SchemaCompile` listing every error.
pub fn compile(schema: &SchemaDef, registry: &FunctionRegistry) -> Result<CompiledSchema> {
    let (compiled, issues) = analyze(schema, registry);
    let errors: Vec<_> = issues
        .iter()
        .filter(|i| i.severity == Severity::Error)
        .map(|i| i.message.clone())
        .collect();
    if !errors.is_empty() {
        return Err(MungerError::SchemaCompile(errors.join("; ")));
    }
    for warning in &issues {
        tracing::warn!(code = warning.code, "{}", warning.message);
    }
    Ok(compiled)
}

fn analyze(schema: &SchemaDef, registry: &FunctionRegistry) -> (CompiledSchema, Vec<SchemaIssue>) {
    let mut compiled = CompiledSchema::default();
    let mut issues = Vec::new();
    for (stage, def) in schema.stages() {
        compiled.insert(compile_stage(stage, def, registry, &mut issues));
    }
    (compiled, issues)
}

fn compile_stage(
    stage: Stage,
    def: &StageDef,
    registry: &FunctionRegistry,
    issues: &mut Vec<SchemaIssue>,
) -> CompiledStage {
    if def.rules.is_empty() {
        issues.push(SchemaIssue {
            code: "empty_stage",
            severity: Severity::Warning,
            message: format!("{stage} stage has no rules; every record passes it"),
            stage,
            field: None,
            fix: Some(format!("Add rules or remove the {stage} stage")),
        });
    }

    let mut rules = Vec::with_capacity(def.rules.len());
    for (i, spec) in def.rules.iter().enumerate() {
        let mut issue = |code, message: String, fix: Option<String>| {
            issues.push(SchemaIssue {
                code,
                severity: Severity::Error,
                message: format!("{} {message}", location(stage, i, spec)),
                stage,
                field: spec.field.clone(),
                fix,
            });
        };

        if let Some(field) = &spec.field {
            if field.trim().is_empty() {
                issue("empty_field", "has an empty field name".into(), None);
                continue;
            }
            if let Some(shape) = &def.shape {
                if !shape.iter().any(|f| f == field) {
                    issue(
                        "field_not_in_shape",
                        format!("names field '{field}' which is not in the declared shape"),
                        Some(format!("Add '{field}' to the {stage} shape or fix the field name")),
                    );
                    continue;
                }
            }
        }

        let kind = stage.function_kind();
        let function = match registry.resolve(kind, &spec.function) {
            Ok(f) => f,
            Err(_) => {
                let other = match kind {
                    FunctionKind::Coercion => FunctionKind::Predicate,
                    FunctionKind::Predicate => FunctionKind::Coercion,
                };
                let fix = registry.has(other, &spec.function).then(|| {
                    format!(
                        "'{}' is a {other}; {kind} functions are expected in the {stage} stage",
                        spec.function
                    )
                });
                issue(
                    "unknown_function",
                    format!("unknown {kind} function '{}'", spec.function),
                    fix,
                );
                continue;
            }
        };

        let action = match bind(function, &spec.args) {
            Ok(action) => action,
            Err(message) => {
                issue(
                    "malformed_args",
                    format!("{}: {message}", spec.describe()),
                    None,
                );
                continue;
            }
        };

        let field_bound = matches!(
            action,
            RuleAction::Transform(Transform::Field(_)) | RuleAction::Check(Check::Field(_))
        );
        if field_bound && spec.field.is_none() {
            issue(
                "missing_field",
                format!("'{}' works on a single field but no field is given", spec.function),
                Some("Set the rule's field".into()),
            );
            continue;
        }

        rules.push(CompiledRule {
            stage,
            field: spec.field.clone(),
            function: spec.function.clone(),
            args: spec.args.clone(),
            required: spec.required,
            action,
        });
    }

    CompiledStage {
        stage,
        shape: def.shape.clone(),
        rules,
    }
}

fn bind(function: &RuleFunction, args: &[Value]) -> std::result::Result<RuleAction, String> {
    match function {
        RuleFunction::Coercion(builder) => guarded(|| builder(args)).map(RuleAction::Transform),
        RuleFunction::Predicate(builder) => guarded(|| builder(args)).map(RuleAction::Check),
    }
}

fn location(stage: Stage, index: usize, spec: &RuleSpec) -> String {
    match &spec.field {
        Some(field) => format!("{stage} rule {} on '{field}':", index + 1),
        None => format!("{stage} rule {}:", index + 1),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
