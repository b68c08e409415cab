//! Condition expression language for hook `when` clauses: parser and evaluator.
//!
//! Grammar:
//! ```text
//! ConditionExpr  ::= Clause ( '&&' Clause )*
//! Clause         ::= Key Operator Literal
//! Key            ::= 'field.' name | 'status.' stage | 'index'
//! Operator       ::= '=' | '!='
//! Literal        ::= QuotedString | BareWord
//! ```

use std::fmt;

use munger_types::{MungerError, RecordOutcome, Stage};

/// A parsed condition expression consisting of one or more clauses joined by `&&`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionExpr {
    pub clauses: Vec<Clause>,
}

/// A single comparison clause: `key op value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub key: ConditionKey,
    pub operator: Operator,
    pub value: String,
}

/// What a clause looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionKey {
    /// A record field rendered as text; missing fields read as `""`.
    Field(String),
    /// A stage status: `passed`, `failed`, `not_run` or `absent`.
    Status(Stage),
    /// The record's position in the input.
    Index,
}

impl fmt::Display for ConditionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionKey::Field(name) => write!(f, "field.{name}"),
            ConditionKey::Status(stage) => write!(f, "status.{stage}"),
            ConditionKey::Index => f.write_str("index"),
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
}

const STATUS_VALUES: &[&str] = &["passed", "failed", "not_run", "absent"];

/// Parse a condition string into a [`ConditionExpr`].
///
/// An empty or whitespace-only input produces an expression with zero clauses,
/// which [`evaluate_condition`] treats as always true.
pub fn parse_condition(input: &str) -> Result<ConditionExpr, MungerError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(ConditionExpr {
            clauses: Vec::new(),
        });
    }

    let clauses = split_clauses(trimmed)
        .into_iter()
        .map(parse_clause)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ConditionExpr { clauses })
}

/// Split on `&&` outside quoted regions.
fn split_clauses(input: &str) -> Vec<&str> {
    let bytes = input.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        match (quote, bytes[i]) {
            (Some(q), b) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(bytes[i]),
            (None, b'&') if bytes.get(i + 1) == Some(&b'&') => {
                parts.push(&input[start..i]);
                start = i + 2;
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&input[start..]);
    parts
}

fn parse_clause(input: &str) -> Result<Clause, MungerError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(make_error("empty clause"));
    }

    let (key_end, operator, op_len) = find_operator(input)?;

    let raw_key = input[..key_end].trim();
    if raw_key.is_empty() {
        return Err(make_error("missing key before operator"));
    }
    let key = parse_key(raw_key)?;

    let raw_value = input[key_end + op_len..].trim();
    if raw_value.is_empty() {
        return Err(make_error(&format!("missing value after operator in '{input}'")));
    }
    let value = strip_quotes(raw_value);

    if let ConditionKey::Status(stage) = key {
        if !STATUS_VALUES.contains(&value.as_str()) {
            return Err(make_error(&format!(
                "status.{stage} compares against one of {}, got '{value}'",
                STATUS_VALUES.join("|")
            )));
        }
    }

    Ok(Clause {
        key,
        operator,
        value,
    })
}

fn parse_key(raw: &str) -> Result<ConditionKey, MungerError> {
    if raw == "index" {
        return Ok(ConditionKey::Index);
    }
    match raw.split_once('.') {
        Some(("field", name)) if !name.is_empty() && !name.contains(char::is_whitespace) => {
            Ok(ConditionKey::Field(name.to_string()))
        }
        Some(("status", stage)) => Stage::ALL
            .into_iter()
            .find(|s| s.as_str() == stage)
            .map(ConditionKey::Status)
            .ok_or_else(|| make_error(&format!("unknown stage '{stage}' in key '{raw}'"))),
        _ => Err(make_error(&format!(
            "invalid key '{raw}'; expected field.<name>, status.<stage> or index"
        ))),
    }
}

fn find_operator(input: &str) -> Result<(usize, Operator, usize), MungerError> {
    // Scan for `!=` or `=`, skipping quoted regions.
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i += 1;
            }
            b'!' if i + 1 < bytes.len() && bytes[i + 1] == b'=' => {
                return Ok((i, Operator::NotEq, 2));
            }
            b'=' => {
                return Ok((i, Operator::Eq, 1));
            }
            _ => {
                i += 1;
            }
        }
    }
    Err(make_error(&format!("no operator found in '{input}'")))
}

fn strip_quotes(s: &str) -> String {
    if s.len() >= 2 {
        let bytes = s.as_bytes();
        if (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')
        {
            return s[1..s.len() - 1].to_string();
        }
    }
    s.to_string()
}

fn make_error(msg: &str) -> MungerError {
    MungerError::InvalidHook(format!("condition parse error: {msg}"))
}

/// Evaluate a condition expression against values provided by a resolver function.
///
/// An expression with zero clauses (from an empty input) evaluates to `true`.
pub fn evaluate_condition(expr: &ConditionExpr, resolve: &dyn Fn(&ConditionKey) -> String) -> bool {
    expr.clauses.iter().all(|clause| {
        let actual = resolve(&clause.key);
        match clause.operator {
            Operator::Eq => actual == clause.value,
            Operator::NotEq => actual != clause.value,
        }
    })
}

/// Resolve condition keys against a record outcome.
pub fn resolve_outcome_key(outcome: &RecordOutcome, key: &ConditionKey) -> String {
    match key {
        ConditionKey::Field(name) => outcome.record.text(name).unwrap_or_default(),
        ConditionKey::Status(stage) => outcome.status(*stage).as_str().to_string(),
        ConditionKey::Index => outcome.index().to_string(),
    }
}
