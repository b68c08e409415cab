//! Built-in rule functions and the argument helpers they share.
//!
//! - [`coercions`] — text, number, date and path rewrites, plus structural
//!   record transforms (`rename`, `map_to`, `default`)
//! - [`predicates`] — comparisons, lengths, patterns and the path/date format
//!   checks used by the target layouts

pub mod coercions;
pub mod predicates;

use std::str::FromStr;

use bigdecimal::BigDecimal;
use munger_types::Value;

use crate::registry::{FunctionRegistry, RuleResult};

/// Register every built-in under its catalog name. Existing entries with the
/// same name are overwritten.
pub fn register_builtins(reg: &mut FunctionRegistry) {
    for (name, function) in coercions::catalog() {
        reg.replace(name, function);
    }
    for (name, function) in predicates::catalog() {
        reg.replace(name, function);
    }
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

pub(crate) fn expect_args(args: &[Value], count: usize) -> RuleResult<()> {
    if args.len() == count {
        Ok(())
    } else {
        Err(format!(
            "expects {count} argument{}, got {}",
            if count == 1 { "" } else { "s" },
            args.len()
        ))
    }
}

pub(crate) fn expect_some_args(args: &[Value]) -> RuleResult<()> {
    if args.is_empty() {
        Err("expects at least 1 argument, got 0".into())
    } else {
        Ok(())
    }
}

pub(crate) fn arg_str(args: &[Value], i: usize) -> RuleResult<String> {
    match args.get(i) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(format!("argument {} must be a string, got {other}", i + 1)),
        None => Err(format!("missing argument {}", i + 1)),
    }
}

pub(crate) fn arg_usize(args: &[Value], i: usize) -> RuleResult<usize> {
    match args.get(i) {
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| format!("argument {} must be a non-negative integer, got {n}", i + 1)),
        Some(other) => Err(format!(
            "argument {} must be a non-negative integer, got {other}",
            i + 1
        )),
        None => Err(format!("missing argument {}", i + 1)),
    }
}

pub(crate) fn arg_decimal(args: &[Value], i: usize) -> RuleResult<BigDecimal> {
    match args.get(i) {
        Some(v) => as_decimal(v).ok_or_else(|| format!("argument {} must be a number, got {v}", i + 1)),
        None => Err(format!("missing argument {}", i + 1)),
    }
}

/// Arguments as a flat list: a single array argument is unpacked, so both
/// `["a", "b"]` and `[["a", "b"]]` mean the same set.
pub(crate) fn arg_list(args: &[Value]) -> Vec<Value> {
    match args {
        [Value::Array(items)] => items.clone(),
        _ => args.to_vec(),
    }
}

/// [`arg_list`] that must hold at least one value. `[[]]` counts as empty.
pub(crate) fn arg_nonempty_list(args: &[Value]) -> RuleResult<Vec<Value>> {
    expect_some_args(args)?;
    let list = arg_list(args);
    if list.is_empty() {
        return Err("expects at least 1 value, got an empty list".into());
    }
    Ok(list)
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

/// Exact decimal view of a value: numbers as-is, strings parsed after
/// trimming.
pub(crate) fn as_decimal(value: &Value) -> Option<BigDecimal> {
    match value {
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        Value::String(s) => BigDecimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Loose equality used by `equals` / `one_of`: identical JSON, equal numbers
/// (`"5"` equals `5`), or equal text renderings.
pub(crate) fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    if let (Some(x), Some(y)) = (as_decimal(a), as_decimal(b)) {
        return x == y;
    }
    match (a, b) {
        (Value::String(_), _) | (_, Value::String(_)) => {
            munger_types::value_to_text(a) == munger_types::value_to_text(b)
        }
        _ => false,
    }
}
