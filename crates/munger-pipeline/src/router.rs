//! Hook router: maps a record outcome to the destinations it should be
//! written to.
//!
//! Each binding names an outcome category, an optional `when` condition and
//! a destination list. A record goes to the union of the destinations of every
//! binding that fires, in binding order, each destination at most once.

use std::fmt;
use std::str::FromStr;

use munger_types::{DestinationId, MungerError, RecordOutcome, Result, Stage, StageStatus};

use crate::condition::{evaluate_condition, parse_condition, resolve_outcome_key, ConditionExpr};
use crate::schema::HookSpec;

// ---------------------------------------------------------------------------
// OutcomeCategory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeCategory {
    FilteredOut,
    CoercedWithErrors,
    CoercedClean,
    ValidationFailed,
    ValidationPassed,
    FullyPassed,
    AnyFailure,
}

impl OutcomeCategory {
    pub const ALL: [OutcomeCategory; 7] = [
        OutcomeCategory::FilteredOut,
        OutcomeCategory::CoercedWithErrors,
        OutcomeCategory::CoercedClean,
        OutcomeCategory::ValidationFailed,
        OutcomeCategory::ValidationPassed,
        OutcomeCategory::FullyPassed,
        OutcomeCategory::AnyFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeCategory::FilteredOut => "filtered-out",
            OutcomeCategory::CoercedWithErrors => "coerced-with-errors",
            OutcomeCategory::CoercedClean => "coerced-clean",
            OutcomeCategory::ValidationFailed => "validation-failed",
            OutcomeCategory::ValidationPassed => "validation-passed",
            OutcomeCategory::FullyPassed => "fully-passed",
            OutcomeCategory::AnyFailure => "any-failure",
        }
    }

    /// The stage this category depends on, if it is tied to one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            OutcomeCategory::FilteredOut => Some(Stage::Filter),
            OutcomeCategory::CoercedWithErrors | OutcomeCategory::CoercedClean => Some(Stage::Coerce),
            OutcomeCategory::ValidationFailed | OutcomeCategory::ValidationPassed => {
                Some(Stage::Validate)
            }
            OutcomeCategory::FullyPassed | OutcomeCategory::AnyFailure => None,
        }
    }

    pub fn matches(&self, outcome: &RecordOutcome) -> bool {
        match self {
            OutcomeCategory::FilteredOut => outcome.status(Stage::Filter) == StageStatus::Failed,
            OutcomeCategory::CoercedWithErrors => outcome
                .stage(Stage::Coerce)
                .is_some_and(|s| !s.diagnostics.is_empty()),
            OutcomeCategory::CoercedClean => outcome
                .stage(Stage::Coerce)
                .is_some_and(|s| s.diagnostics.is_empty()),
            OutcomeCategory::ValidationFailed => {
                outcome.status(Stage::Validate) == StageStatus::Failed
            }
            OutcomeCategory::ValidationPassed => {
                outcome.status(Stage::Validate) == StageStatus::Passed
            }
            OutcomeCategory::FullyPassed => outcome.fully_passed(),
            OutcomeCategory::AnyFailure => outcome.any_failed(),
        }
    }
}

impl fmt::Display for OutcomeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutcomeCategory {
    type Err = MungerError;

    /// Accepts the kebab-case names, case-insensitively and with `_` for `-`,
    /// plus the older aliases `failed-filter`, `failed-coercion`,
    /// `failed-validation`, `valid` and `end`.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        let category = match normalized.as_str() {
            "filtered-out" | "failed-filter" => OutcomeCategory::FilteredOut,
            "coerced-with-errors" | "failed-coercion" => OutcomeCategory::CoercedWithErrors,
            "coerced-clean" => OutcomeCategory::CoercedClean,
            "validation-failed" | "failed-validation" => OutcomeCategory::ValidationFailed,
            "validation-passed" => OutcomeCategory::ValidationPassed,
            "fully-passed" | "valid" | "end" => OutcomeCategory::FullyPassed,
            "any-failure" => OutcomeCategory::AnyFailure,
            _ => {
                let known: Vec<&str> = Self::ALL.iter().map(|c| c.as_str()).collect();
                return Err(MungerError::InvalidHook(format!(
                    "unknown outcome category '{s}'; expected one of {}",
                    known.join(", ")
                )));
            }
        };
        Ok(category)
    }
}

// ---------------------------------------------------------------------------
// HookBinding / HookRouter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HookBinding {
    pub category: OutcomeCategory,
    pub condition: Option<ConditionExpr>,
    pub destinations: Vec<DestinationId>,
}

impl HookBinding {
    pub fn new<I, S>(category: OutcomeCategory, destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<DestinationId>,
    {
        Self {
            category,
            condition: None,
            destinations: destinations.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a config-level hook.
    pub fn from_spec(spec: &HookSpec) -> Result<Self> {
        let category: OutcomeCategory = spec.on.parse()?;
        let condition = spec
            .when
            .as_deref()
            .map(parse_condition)
            .transpose()?
            .filter(|expr| !expr.clauses.is_empty());
        if let Some(bad) = spec.destinations.iter().find(|d| d.trim().is_empty()) {
            return Err(MungerError::InvalidHook(format!(
                "hook on '{}' has an empty destination name '{bad}'",
                spec.on
            )));
        }
        Ok(Self {
            category,
            condition,
            destinations: spec.destinations.clone(),
        })
    }

    pub fn fires(&self, outcome: &RecordOutcome) -> bool {
        self.category.matches(outcome)
            && self.condition.as_ref().map_or(true, |expr| {
                evaluate_condition(expr, &|key| resolve_outcome_key(outcome, key))
            })
    }
}

/// Ordered list of hook bindings. Pure: routing reads the outcome and
/// nothing else.
#[derive(Debug, Clone, Default)]
pub struct HookRouter {
    bindings: Vec<HookBinding>,
}

impl HookRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: &[HookSpec]) -> Result<Self> {
        let bindings = specs
            .iter()
            .map(HookBinding::from_spec)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { bindings })
    }

    pub fn bind(&mut self, binding: HookBinding) {
        self.bindings.push(binding);
    }

    pub fn bindings(&self) -> &[HookBinding] {
        &self.bindings
    }

    /// Every destination named by any binding, first-mention order.
    pub fn destinations(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for dest in self.bindings.iter().flat_map(|b| b.destinations.iter()) {
            if !seen.contains(&dest.as_str()) {
                seen.push(dest.as_str());
            }
        }
        seen
    }

    /// Destinations for one record. Empty means the record is unrouted.
    pub fn route(&self, outcome: &RecordOutcome) -> Vec<DestinationId> {
        let mut routed: Vec<DestinationId> = Vec::new();
        for binding in self.bindings.iter().filter(|b| b.fires(outcome)) {
            for dest in &binding.destinations {
                if !routed.contains(dest) {
                    routed.push(dest.clone());
                }
            }
        }
        routed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
