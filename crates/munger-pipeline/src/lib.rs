//! Record pipeline engine: function registry, schema compiler, stage
//! executors, orchestration, and hook routing.
//!
//! This crate implements the core munger runner: declarative filter / coerce /
//! validate schemas compiled against a registry of named rule functions,
//! record-at-a-time orchestration with short-circuits, and routing of each
//! outcome to caller-defined destinations.

pub mod builtins;
pub mod compiler;
pub mod condition;
pub mod engine;
pub mod executor;
pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod schema;
pub mod sink;
pub mod summary;

pub use compiler::{
    compile, lint, CompiledRule, CompiledSchema, CompiledStage, RuleAction, SchemaIssue, Severity,
};
pub use condition::{
    evaluate_condition, parse_condition, Clause, ConditionExpr, ConditionKey, Operator,
};
pub use engine::{Munger, MungerBuilder, WriteErrorPolicy};
pub use executor::{run_coerce, run_filter, run_validate};
pub use orchestrator::{Orchestrator, PipelineOptions};
pub use registry::{
    default_registry, Check, FieldPredicate, FieldTransform, FunctionRegistry, RecordPredicate,
    RecordTransform, RuleFunction, RuleResult, Transform,
};
pub use router::{HookBinding, HookRouter, OutcomeCategory};
pub use schema::{HookSpec, PipelineSpec, RuleSpec, SchemaDef, StageDef};
pub use sink::{FnSink, MemorySink, RecordSink};
pub use summary::{RunSummary, StageCounts};
