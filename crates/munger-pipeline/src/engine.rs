//! Run controller: feeds records through the orchestrator, routes each
//! outcome and dispatches it to the sink.
//!
//! Lifecycle: build (compile schema, parse hooks), then one pass over the
//! input in order, then finish the sink and return the [`RunSummary`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use munger_types::{DestinationId, Fields, MungerError, Record, RecordOutcome, Result, Stage};
use serde::{Deserialize, Serialize};

use crate::compiler::compile;
use crate::orchestrator::{Orchestrator, PipelineOptions};
use crate::registry::{default_registry, FunctionRegistry};
use crate::router::{HookBinding, HookRouter};
use crate::schema::{HookSpec, PipelineSpec, SchemaDef};
use crate::sink::RecordSink;
use crate::summary::RunSummary;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// What to do when a sink rejects a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteErrorPolicy {
    /// Stop the run and return the error.
    #[default]
    Halt,
    /// Log, count in `write_errors`, and carry on.
    Skip,
}

/// Assembles a [`Munger`]. Nothing is compiled until [`build`](Self::build).
#[derive(Default)]
pub struct MungerBuilder {
    registry: Option<FunctionRegistry>,
    schema: SchemaDef,
    hooks: Vec<HookSpec>,
    bindings: Vec<HookBinding>,
    options: PipelineOptions,
    write_error_policy: WriteErrorPolicy,
    cancel: Option<Arc<AtomicBool>>,
}

/// A compiled pipeline ready to run.
#[derive(Debug)]
pub struct Munger {
    orchestrator: Orchestrator,
    router: HookRouter,
    write_error_policy: WriteErrorPolicy,
    cancel: Option<Arc<AtomicBool>>,
}

// ---------------------------------------------------------------------------
// MungerBuilder
// ---------------------------------------------------------------------------

impl MungerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `registry` instead of the built-in catalog.
    pub fn registry(mut self, registry: FunctionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn schema(mut self, schema: SchemaDef) -> Self {
        self.schema = schema;
        self
    }

    /// Take schema, hooks and options from a pipeline document.
    pub fn spec(mut self, spec: PipelineSpec) -> Self {
        self.schema = spec.schema;
        self.hooks.extend(spec.hooks);
        self.options = spec.options;
        self
    }

    pub fn hook(mut self, hook: HookSpec) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Add an already-parsed binding. Bindings follow config hooks in
    /// routing order.
    pub fn binding(mut self, binding: HookBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn on_write_error(mut self, policy: WriteErrorPolicy) -> Self {
        self.write_error_policy = policy;
        self
    }

    /// Stop the run before the next record once `flag` is set.
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Compile the schema and parse the hooks. Fails before any record is
    /// read.
    pub fn build(self) -> Result<Munger> {
        if self.schema.is_empty() {
            return Err(MungerError::NoStagesConfigured);
        }
        let registry = self.registry.unwrap_or_else(default_registry);
        let compiled = compile(&self.schema, &registry)?;

        let mut router = HookRouter::from_specs(&self.hooks)?;
        for binding in self.bindings {
            router.bind(binding);
        }

        for binding in router.bindings() {
            if let Some(stage) = binding.category.stage() {
                if !compiled.has_stage(stage) {
                    tracing::warn!(
                        category = %binding.category,
                        stage = %stage,
                        "Hook bound to a stage that is not configured; it will never fire"
                    );
                }
            }
        }

        let configured: Vec<&str> = compiled.configured().iter().map(|s| s.as_str()).collect();
        tracing::debug!(
            stages = %configured.join(","),
            hooks = router.bindings().len(),
            "Pipeline built"
        );

        Ok(Munger {
            orchestrator: Orchestrator::new(compiled, self.options),
            router,
            write_error_policy: self.write_error_policy,
            cancel: self.cancel,
        })
    }
}

// ---------------------------------------------------------------------------
// Munger
// ---------------------------------------------------------------------------

impl Munger {
    pub fn builder() -> MungerBuilder {
        MungerBuilder::new()
    }

    pub fn router(&self) -> &HookRouter {
        &self.router
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Run one record through the stages and route it, without writing.
    pub fn process(&self, record: Record) -> (RecordOutcome, Vec<DestinationId>) {
        let outcome = self.orchestrator.process(record);
        let destinations = self.router.route(&outcome);
        (outcome, destinations)
    }

    /// Run an infallible record stream to completion.
    pub fn run<I, S>(&self, records: I, sink: &mut S) -> Result<RunSummary>
    where
        I: IntoIterator<Item = Fields>,
        S: RecordSink + ?Sized,
    {
        self.try_run(records.into_iter().map(Ok), sink)
    }

    /// Run a fallible record stream. The first input error aborts the run.
    pub fn try_run<I, S>(&self, records: I, sink: &mut S) -> Result<RunSummary>
    where
        I: IntoIterator<Item = Result<Fields>>,
        S: RecordSink + ?Sized,
    {
        let mut summary = RunSummary::default();
        let mut records = records.into_iter();
        let mut index: u64 = 0;

        tracing::info!(
            stages = self.orchestrator.schema().configured().len(),
            hooks = self.router.bindings().len(),
            "Run started"
        );

        loop {
            if self.is_cancelled() {
                tracing::warn!(processed = index, "Run cancelled");
                summary.cancelled = true;
                break;
            }
            let Some(item) = records.next() else {
                break;
            };
            let fields = match item {
                Ok(fields) => fields,
                Err(e @ MungerError::Input { .. }) => return Err(e),
                Err(e) => {
                    return Err(MungerError::Input {
                        index,
                        message: e.to_string(),
                    })
                }
            };

            let (outcome, destinations) = self.process(Record::new(index, fields));
            summary.record_outcome(&outcome);
            tracing::debug!(
                index,
                filter = outcome.status(Stage::Filter).as_str(),
                coerce = outcome.status(Stage::Coerce).as_str(),
                validate = outcome.status(Stage::Validate).as_str(),
                destinations = destinations.len(),
                "Record processed"
            );

            if destinations.is_empty() {
                summary.unrouted += 1;
                tracing::debug!(index, "Record matched no hook; dropped");
            }
            for destination in &destinations {
                if let Err(e) = self.dispatch(sink, &outcome, destination, &mut summary) {
                    if let Err(finish) = sink.finish() {
                        tracing::warn!("Sink failed to finish after write error: {finish}");
                    }
                    return Err(e);
                }
            }
            index += 1;
        }

        sink.finish()?;
        tracing::info!(
            input = summary.input,
            fully_passed = summary.fully_passed,
            unrouted = summary.unrouted,
            write_errors = summary.write_errors,
            "Run finished"
        );
        Ok(summary)
    }

    fn dispatch<S: RecordSink + ?Sized>(
        &self,
        sink: &mut S,
        outcome: &RecordOutcome,
        destination: &str,
        summary: &mut RunSummary,
    ) -> Result<()> {
        match sink.accept_outcome(outcome, destination) {
            Ok(()) => {
                summary.record_write(destination);
                Ok(())
            }
            Err(e) => {
                let err = match e {
                    e @ MungerError::Write { .. } => e,
                    other => MungerError::Write {
                        destination: destination.to_string(),
                        index: outcome.index(),
                        message: other.to_string(),
                    },
                };
                match self.write_error_policy {
                    WriteErrorPolicy::Halt => Err(err),
                    WriteErrorPolicy::Skip => {
                        tracing::warn!("{err}; skipping");
                        summary.write_errors += 1;
                        Ok(())
                    }
                }
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
