//! Declarative pipeline definition: schema, rules and hook bindings as data.
//!
//! Everything here is plain `serde` data. Nothing is resolved against the
//! registry until [`compile`](crate::compiler::compile) runs.

use std::path::Path;

use munger_types::{Result, Stage, Value};
use serde::{Deserialize, Serialize};

use crate::orchestrator::PipelineOptions;

/// One rule as written by the schema author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Field the rule applies to. `None` binds the rule to the whole record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Registry name of the coercion or predicate.
    pub function: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    #[serde(default)]
    pub required: bool,
}

impl RuleSpec {
    /// A rule bound to `field`.
    pub fn new(field: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            function: function.into(),
            args: Vec::new(),
            required: false,
        }
    }

    /// A rule bound to the whole record.
    pub fn record(function: impl Into<String>) -> Self {
        Self {
            field: None,
            function: function.into(),
            args: Vec::new(),
            required: false,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = Value>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// `function(args)` for messages and diagnostics.
    pub fn describe(&self) -> String {
        if self.args.is_empty() {
            self.function.clone()
        } else {
            let args: Vec<String> = self.args.iter().map(Value::to_string).collect();
            format!("{}({})", self.function, args.join(", "))
        }
    }
}

/// Rules for one stage, in author order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageDef {
    /// Declared field names. When set, rules may only name these fields.
    /// Records may still carry other fields; they pass through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<String>>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

impl StageDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shape<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shape = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn rule(mut self, rule: RuleSpec) -> Self {
        self.rules.push(rule);
        self
    }

    /// Append several rules for one field, keeping their order. Rules that
    /// already name a field keep it.
    pub fn field(mut self, name: &str, rules: impl IntoIterator<Item = RuleSpec>) -> Self {
        for mut rule in rules {
            if rule.field.is_none() {
                rule.field = Some(name.to_string());
            }
            self.rules.push(rule);
        }
        self
    }
}

/// The three optional stages. An absent stage is skipped for every record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<StageDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coerce: Option<StageDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<StageDef>,
}

impl SchemaDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stage: Stage) -> Option<&StageDef> {
        match stage {
            Stage::Filter => self.filter.as_ref(),
            Stage::Coerce => self.coerce.as_ref(),
            Stage::Validate => self.validate.as_ref(),
        }
    }

    pub fn set(&mut self, stage: Stage, def: StageDef) {
        let slot = match stage {
            Stage::Filter => &mut self.filter,
            Stage::Coerce => &mut self.coerce,
            Stage::Validate => &mut self.validate,
        };
        *slot = Some(def);
    }

    pub fn with_stage(mut self, stage: Stage, def: StageDef) -> Self {
        self.set(stage, def);
        self
    }

    /// Configured stages in execution order.
    pub fn stages(&self) -> impl Iterator<Item = (Stage, &StageDef)> {
        Stage::ALL
            .into_iter()
            .filter_map(|stage| self.get(stage).map(|def| (stage, def)))
    }

    pub fn is_empty(&self) -> bool {
        self.stages().next().is_none()
    }
}

/// A routing binding as written in config: outcome category, optional
/// condition, destinations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookSpec {
    pub on: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    pub destinations: Vec<String>,
}

impl HookSpec {
    pub fn new<I, S>(on: impl Into<String>, destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            on: on.into(),
            when: None,
            destinations: destinations.into_iter().map(Into::into).collect(),
        }
    }

    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.when = Some(condition.into());
        self
    }
}

/// A complete pipeline document: schema, hooks and options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    #[serde(default)]
    pub schema: SchemaDef,
    #[serde(default)]
    pub hooks: Vec<HookSpec>,
    #[serde(default)]
    pub options: PipelineOptions,
}

impl PipelineSpec {
    pub fn from_json(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_json(&source)
    }
}
