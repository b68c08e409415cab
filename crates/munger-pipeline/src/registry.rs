//! Rule function registry: named coercions and predicates.
//!
//! Every entry is a *builder*: it receives a rule's argument list once, at
//! schema compile time, and returns a bound callable. Malformed arguments are
//! therefore reported before any record is read, and a compiled schema keeps
//! its own handle to each callable so later registrations never reach it.

use std::collections::HashMap;
use std::sync::Arc;

use munger_types::{Fields, FunctionKind, MungerError, Result, Value};

/// Outcome of a single rule function call. `Err` carries the failure message
/// that ends up in the record's diagnostics.
pub type RuleResult<T> = std::result::Result<T, String>;

// ---------------------------------------------------------------------------
// Bound callables
// ---------------------------------------------------------------------------

pub type FieldTransform = Arc<dyn Fn(&Value) -> RuleResult<Value> + Send + Sync>;
pub type RecordTransform = Arc<dyn Fn(Option<&str>, &mut Fields) -> RuleResult<()> + Send + Sync>;
pub type FieldPredicate = Arc<dyn Fn(&Value) -> RuleResult<()> + Send + Sync>;
pub type RecordPredicate = Arc<dyn Fn(Option<&str>, &Fields) -> RuleResult<()> + Send + Sync>;

/// A bound coercion.
#[derive(Clone)]
pub enum Transform {
    /// Rewrites one field's value. Skipped when the record lacks the field.
    Field(FieldTransform),
    /// Rewrites the record (rename, copy, fill). Receives the rule's field, if any.
    Record(RecordTransform),
}

/// A bound predicate.
#[derive(Clone)]
pub enum Check {
    /// Checks one field's value. A missing field has nothing to check and passes.
    Field(FieldPredicate),
    /// Checks the whole record. Receives the rule's field, if any.
    Record(RecordPredicate),
}

pub type CoercionBuilder = Arc<dyn Fn(&[Value]) -> RuleResult<Transform> + Send + Sync>;
pub type PredicateBuilder = Arc<dyn Fn(&[Value]) -> RuleResult<Check> + Send + Sync>;

// ---------------------------------------------------------------------------
// RuleFunction
// ---------------------------------------------------------------------------

/// A registry entry.
#[derive(Clone)]
pub enum RuleFunction {
    Coercion(CoercionBuilder),
    Predicate(PredicateBuilder),
}

impl RuleFunction {
    pub fn kind(&self) -> FunctionKind {
        match self {
            RuleFunction::Coercion(_) => FunctionKind::Coercion,
            RuleFunction::Predicate(_) => FunctionKind::Predicate,
        }
    }

    /// A field coercion that takes no arguments.
    pub fn coercion<F>(f: F) -> Self
    where
        F: Fn(&Value) -> RuleResult<Value> + Send + Sync + 'static,
    {
        let bound: FieldTransform = Arc::new(f);
        Self::coercion_builder(move |args| {
            no_args(args)?;
            Ok(Transform::Field(bound.clone()))
        })
    }

    /// A coercion whose behaviour depends on the rule's arguments.
    pub fn coercion_builder<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> RuleResult<Transform> + Send + Sync + 'static,
    {
        RuleFunction::Coercion(Arc::new(f))
    }

    /// A field predicate that takes no arguments.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Value) -> RuleResult<()> + Send + Sync + 'static,
    {
        let bound: FieldPredicate = Arc::new(f);
        Self::predicate_builder(move |args| {
            no_args(args)?;
            Ok(Check::Field(bound.clone()))
        })
    }

    /// A predicate whose behaviour depends on the rule's arguments.
    pub fn predicate_builder<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> RuleResult<Check> + Send + Sync + 'static,
    {
        RuleFunction::Predicate(Arc::new(f))
    }
}

fn no_args(args: &[Value]) -> RuleResult<()> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(format!("takes no arguments, got {}", args.len()))
    }
}

// ---------------------------------------------------------------------------
// FunctionRegistry
// ---------------------------------------------------------------------------

/// Named rule functions keyed by `(kind, name)`.
///
/// The same name may exist once as a coercion and once as a predicate.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<(FunctionKind, String), RuleFunction>,
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the built-in catalog.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        crate::builtins::register_builtins(&mut reg);
        reg
    }

    /// Add a function. Fails if the `(kind, name)` key is taken; use
    /// [`replace`](Self::replace) to overwrite on purpose.
    pub fn register(&mut self, name: impl Into<String>, function: RuleFunction) -> Result<()> {
        let key = (function.kind(), name.into());
        if self.functions.contains_key(&key) {
            return Err(MungerError::DuplicateRegistration {
                kind: key.0,
                name: key.1,
            });
        }
        self.functions.insert(key, function);
        Ok(())
    }

    /// Add or overwrite a function. Returns `true` if an entry was replaced.
    pub fn replace(&mut self, name: impl Into<String>, function: RuleFunction) -> bool {
        let key = (function.kind(), name.into());
        self.functions.insert(key, function).is_some()
    }

    pub fn resolve(&self, kind: FunctionKind, name: &str) -> Result<&RuleFunction> {
        self.functions
            .get(&(kind, name.to_string()))
            .ok_or_else(|| MungerError::UnknownRuleFunction {
                kind,
                name: name.to_string(),
            })
    }

    pub fn has(&self, kind: FunctionKind, name: &str) -> bool {
        self.functions.contains_key(&(kind, name.to_string()))
    }

    /// Registered names of one kind, sorted.
    pub fn names(&self, kind: FunctionKind) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .functions
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Create a registry with every built-in coercion and predicate registered.
pub fn default_registry() -> FunctionRegistry {
    FunctionRegistry::with_builtins()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
