//! End-to-end integration tests for the munger pipeline engine.
//!
//! Each test exercises the full path: declare schema and hooks -> build ->
//! run a record stream -> inspect sink contents and the run summary.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use munger_pipeline::{
    default_registry, FunctionRegistry, HookSpec, MemorySink, Munger, MungerBuilder, PipelineSpec,
    RuleFunction, RuleSpec, SchemaDef, StageDef,
};
use munger_types::{DiagnosticKind, Fields, Stage, StageStatus, Value};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn rows(values: &[Value]) -> Vec<Fields> {
    values
        .iter()
        .map(|v| v.as_object().cloned().expect("row must be a JSON object"))
        .collect()
}

fn build(schema: SchemaDef, hooks: &[HookSpec]) -> Munger {
    hooks
        .iter()
        .cloned()
        .fold(MungerBuilder::new().schema(schema), |b, h| b.hook(h))
        .build()
        .expect("pipeline should build")
}

fn status_open() -> RuleSpec {
    RuleSpec::new("status", "equals").with_args([json!("open")]).required()
}

fn amount_positive() -> RuleSpec {
    RuleSpec::new("amount", "greater_than").with_args([json!(0)]).required()
}

// ---------------------------------------------------------------------------
// Filter-only schema
// ---------------------------------------------------------------------------

#[test]
fn filter_only_schema_passes_iff_required_rules_hold() {
    let schema = SchemaDef::new().with_stage(
        Stage::Filter,
        StageDef::new()
            .rule(status_open())
            .rule(RuleSpec::new("region", "equals").with_args([json!("EU")])),
    );
    let munger = build(
        schema,
        &[
            HookSpec::new("fully-passed", ["kept"]),
            HookSpec::new("filtered-out", ["dropped"]),
        ],
    );
    let mut sink = MemorySink::new();
    munger
        .run(
            rows(&[
                json!({"status": "open", "region": "US"}),
                json!({"status": "closed", "region": "EU"}),
            ]),
            &mut sink,
        )
        .unwrap();

    let kept = sink.outcomes("kept");
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].index(), 0);
    assert_eq!(kept[0].status(Stage::Coerce), StageStatus::Absent);
    assert_eq!(kept[0].status(Stage::Validate), StageStatus::Absent);
    assert_eq!(kept[0].diagnostics().count(), 1, "advisory region failure is recorded");

    let dropped = sink.outcomes("dropped");
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].index(), 1);
}

#[test]
fn failing_filter_reports_later_stages_not_run() {
    let schema = SchemaDef::new()
        .with_stage(Stage::Filter, StageDef::new().rule(status_open()))
        .with_stage(Stage::Validate, StageDef::new().rule(amount_positive()));
    let munger = build(schema, &[HookSpec::new("filtered-out", ["dropped"])]);
    let mut sink = MemorySink::new();
    munger
        .run(rows(&[json!({"status": "closed", "amount": "5"})]), &mut sink)
        .unwrap();
    let out = sink.outcomes("dropped")[0];
    assert_eq!(out.status(Stage::Validate), StageStatus::NotRun);
    assert_eq!(out.status(Stage::Coerce), StageStatus::Absent);
}

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

#[test]
fn to_decimal_is_idempotent_on_canonical_data() {
    let schema = SchemaDef::new().with_stage(
        Stage::Coerce,
        StageDef::new().rule(RuleSpec::new("amount", "to_decimal")),
    );
    let munger = build(schema, &[HookSpec::new("coerced-clean", ["out"])]);

    let mut first = MemorySink::new();
    munger
        .run(
            rows(&[
                json!({"amount": "12.50"}),
                json!({"amount": "-3"}),
                json!({"amount": "12345678901234567.89"}),
            ]),
            &mut first,
        )
        .unwrap();
    let once: Vec<Fields> = first.records("out").iter().map(|r| r.fields.clone()).collect();

    let mut second = MemorySink::new();
    munger.run(once.clone(), &mut second).unwrap();
    let twice: Vec<Fields> = second.records("out").iter().map(|r| r.fields.clone()).collect();

    assert_eq!(once, twice);
    assert_eq!(once[0]["amount"], json!("12.50"));
    assert_eq!(once[2]["amount"], json!("12345678901234567.89"));
}

#[test]
fn panicking_coercion_is_isolated_to_its_record() {
    let mut registry = default_registry();
    registry
        .register(
            "fragile",
            RuleFunction::coercion(|v| {
                if v == "BAD" {
                    panic!("unexpected code");
                }
                Ok(v.clone())
            }),
        )
        .unwrap();
    let schema = SchemaDef::new().with_stage(
        Stage::Coerce,
        StageDef::new().rule(RuleSpec::new("code", "fragile")),
    );
    let munger = MungerBuilder::new()
        .registry(registry)
        .schema(schema)
        .hook(HookSpec::new("coerced-with-errors", ["errors"]))
        .hook(HookSpec::new("coerced-clean", ["clean"]))
        .build()
        .unwrap();

    let mut sink = MemorySink::new();
    let summary = munger
        .run(
            rows(&[json!({"code": "A"}), json!({"code": "BAD"}), json!({"code": "C"})]),
            &mut sink,
        )
        .unwrap();

    assert_eq!(summary.input, 3);
    assert_eq!(summary.coercion_errors, 1);
    assert_eq!(sink.records("clean").len(), 2);
    let errors = sink.outcomes("errors");
    assert_eq!(errors.len(), 1);
    let diag = errors[0].diagnostics().next().unwrap();
    assert_eq!(diag.kind, DiagnosticKind::FunctionPanicked);
    assert_eq!(diag.rule, "fragile");
    assert_eq!(diag.message, r#"panicked on input "BAD": unexpected code"#);
    assert_eq!(errors[0].record.get("code"), Some(&json!("BAD")));
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[test]
fn routing_is_complete_and_never_duplicates() {
    let schema = SchemaDef::new()
        .with_stage(Stage::Coerce, StageDef::new().rule(RuleSpec::new("amount", "to_decimal")))
        .with_stage(Stage::Validate, StageDef::new().rule(amount_positive()));
    let munger = build(
        schema,
        &[
            HookSpec::new("validation-passed", ["good", "audit"]),
            HookSpec::new("fully-passed", ["audit", "good"]),
            HookSpec::new("coerced-clean", ["audit"]),
            HookSpec::new("validation-failed", ["review"]),
        ],
    );

    let counter = Arc::new(AtomicUsize::new(0));
    let seen = counter.clone();
    let mut writes: Vec<(u64, String)> = Vec::new();
    let mut sink = munger_pipeline::FnSink::new(|r: &munger_types::Record, d: &str| {
        seen.fetch_add(1, Ordering::SeqCst);
        writes.push((r.index, d.to_string()));
        Ok(())
    });
    let summary = munger
        .run(rows(&[json!({"amount": "10"}), json!({"amount": "-1"})]), &mut sink)
        .unwrap();
    drop(sink);

    assert_eq!(
        writes,
        vec![
            (0, "good".to_string()),
            (0, "audit".to_string()),
            (1, "audit".to_string()),
            (1, "review".to_string()),
        ]
    );
    assert_eq!(counter.load(Ordering::SeqCst), 4);
    assert_eq!(summary.unrouted, 0);
    assert_eq!(summary.written("audit"), 2);
}

#[test]
fn per_destination_order_follows_input_order() {
    let schema = SchemaDef::new().with_stage(Stage::Validate, StageDef::new().rule(amount_positive()));
    let munger = build(
        schema,
        &[
            HookSpec::new("validation-passed", ["pos"]),
            HookSpec::new("any-failure", ["neg"]),
        ],
    );
    let input: Vec<Value> = (0..20).map(|i| json!({"amount": i - 10})).collect();
    let mut sink = MemorySink::new();
    munger.run(rows(&input), &mut sink).unwrap();

    for dest in ["pos", "neg"] {
        let indexes: Vec<u64> = sink.records(dest).iter().map(|r| r.index).collect();
        let mut sorted = indexes.clone();
        sorted.sort_unstable();
        assert_eq!(indexes, sorted, "{dest} out of order");
    }
    assert_eq!(sink.records("pos").len(), 9);
    assert_eq!(sink.records("neg").len(), 11);
}

#[test]
fn conditional_hooks_split_by_field_value() {
    let schema = SchemaDef::new().with_stage(Stage::Validate, StageDef::new().rule(amount_positive()));
    let munger = build(
        schema,
        &[
            HookSpec::new("fully-passed", ["eu"]).when("field.region=EU"),
            HookSpec::new("fully-passed", ["other"]).when("field.region!=EU"),
        ],
    );
    let mut sink = MemorySink::new();
    munger
        .run(
            rows(&[
                json!({"region": "EU", "amount": 1}),
                json!({"region": "US", "amount": 1}),
                json!({"amount": 1}),
            ]),
            &mut sink,
        )
        .unwrap();
    assert_eq!(sink.records("eu").len(), 1);
    assert_eq!(sink.records("other").len(), 2);
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

#[test]
fn clean_and_review_scenario() {
    let spec = PipelineSpec::from_json(
        r#"{
            "schema": {
                "filter":   { "rules": [ { "field": "status", "function": "equals", "args": ["open"], "required": true } ] },
                "coerce":   { "rules": [ { "field": "amount", "function": "to_decimal" } ] },
                "validate": { "rules": [ { "field": "amount", "function": "greater_than", "args": [0], "required": true } ] }
            },
            "hooks": [
                { "on": "fully-passed", "destinations": ["clean.csv"] },
                { "on": "validation-failed", "destinations": ["review.csv"] },
                { "on": "filtered-out", "destinations": [] }
            ]
        }"#,
    )
    .unwrap();
    let munger = MungerBuilder::new().spec(spec).build().unwrap();

    let mut sink = MemorySink::new();
    let summary = munger
        .run(
            rows(&[
                json!({"status": "open", "amount": "12.50"}),
                json!({"status": "closed", "amount": "5"}),
                json!({"status": "open", "amount": "-3"}),
            ]),
            &mut sink,
        )
        .unwrap();

    let clean = sink.records("clean.csv");
    assert_eq!(clean.len(), 1);
    assert_eq!(clean[0].get("amount"), Some(&json!("12.50")));

    let review = sink.outcomes("review.csv");
    assert_eq!(review.len(), 1);
    assert_eq!(review[0].index(), 2);
    let diags: Vec<_> = review[0].diagnostics().collect();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].rule, "greater_than(0)");
    assert_eq!(diags[0].field.as_deref(), Some("amount"));
    assert_eq!(diags[0].kind, DiagnosticKind::ValidationFailure);

    assert_eq!(summary.input, 3);
    assert_eq!(summary.filtered_out, 1);
    assert_eq!(summary.unrouted, 1);
    assert_eq!(summary.fully_passed, 1);
    assert_eq!(summary.validation_failed, 1);
    assert_eq!(sink.len(), 2);
}

#[test]
fn structural_coercions_reshape_records() {
    let schema = SchemaDef::new().with_stage(
        Stage::Coerce,
        StageDef::new()
            .rule(RuleSpec::new("Field", "rename").with_args([json!("Frog")]))
            .rule(RuleSpec::new("OtherField", "map_to").with_args([json!("OtherField"), json!("Bear")])),
    );
    let munger = build(schema, &[HookSpec::new("fully-passed", ["out"])]);
    let mut sink = MemorySink::new();
    munger
        .run(rows(&[json!({"Field": "1", "OtherField": "a"})]), &mut sink)
        .unwrap();
    let record = sink.records("out")[0];
    let keys: Vec<&str> = record.fields.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["OtherField", "Frog", "Bear"]);
}

#[test]
fn registry_changes_after_build_are_not_observed() {
    let mut registry = FunctionRegistry::new();
    registry
        .register("tag", RuleFunction::coercion(|_| Ok(json!("v1"))))
        .unwrap();
    let schema = SchemaDef::new().with_stage(Stage::Coerce, StageDef::new().rule(RuleSpec::new("x", "tag")));
    let munger = MungerBuilder::new()
        .registry(registry.clone())
        .schema(schema)
        .hook(HookSpec::new("coerced-clean", ["out"]))
        .build()
        .unwrap();
    registry.replace("tag", RuleFunction::coercion(|_| Ok(json!("v2"))));

    let mut sink = MemorySink::new();
    munger.run(rows(&[json!({"x": "?"})]), &mut sink).unwrap();
    assert_eq!(sink.records("out")[0].get("x"), Some(&json!("v1")));
}
