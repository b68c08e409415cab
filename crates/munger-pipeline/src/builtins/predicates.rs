//! Built-in predicates.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use munger_types::{value_to_text, Fields, Value};
use regex::Regex;

use super::coercions::check_format;
use super::{
    arg_decimal, arg_nonempty_list, arg_str, arg_usize, as_decimal, expect_args, loose_eq,
    type_name,
};
use crate::registry::{Check, RuleFunction, RuleResult};

pub(crate) fn catalog() -> Vec<(&'static str, RuleFunction)> {
    vec![
        ("present", RuleFunction::predicate_builder(present)),
        ("not_empty", RuleFunction::predicate_builder(not_empty)),
        ("equals", RuleFunction::predicate_builder(equals)),
        ("not_equals", RuleFunction::predicate_builder(not_equals)),
        ("one_of", RuleFunction::predicate_builder(one_of)),
        ("not_one_of", RuleFunction::predicate_builder(not_one_of)),
        ("greater_than", compare("greater than", Ordering::is_gt)),
        ("less_than", compare("less than", Ordering::is_lt)),
        ("at_least", compare("at least", Ordering::is_ge)),
        ("at_most", compare("at most", Ordering::is_le)),
        ("min_length", RuleFunction::predicate_builder(min_length)),
        ("max_length", RuleFunction::predicate_builder(max_length)),
        ("combined_max_length", RuleFunction::predicate_builder(combined_max_length)),
        ("matches", RuleFunction::predicate_builder(matches)),
        ("is_type", RuleFunction::predicate_builder(is_type)),
        ("has_only_ascii", RuleFunction::predicate(has_only_ascii)),
        ("is_upper", RuleFunction::predicate(is_upper)),
        ("uds_style_path", RuleFunction::predicate(uds_style_path)),
        ("is_numeric", RuleFunction::predicate(is_numeric)),
        ("has_date_format", RuleFunction::predicate_builder(has_date_format)),
        (
            "has_datamapper_date_format",
            RuleFunction::predicate(|v| date_format_check(v, DATAMAPPER_DATE_FORMATS)),
        ),
        (
            "has_datamapper_time_format",
            RuleFunction::predicate(|v| date_format_check(v, DATAMAPPER_TIME_FORMATS)),
        ),
        ("does_not_have_char", RuleFunction::predicate_builder(does_not_have_char)),
        ("no_cr_lf", RuleFunction::predicate(no_cr_lf)),
        ("fields_differ", RuleFunction::predicate_builder(fields_differ)),
    ]
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

fn present(args: &[Value]) -> RuleResult<Check> {
    expect_args(args, 0)?;
    Ok(record_check(|field, fields| {
        let field = field.ok_or("present needs a field")?;
        if fields.contains_key(field) {
            Ok(())
        } else {
            Err("field is missing".into())
        }
    }))
}

fn not_empty(args: &[Value]) -> RuleResult<Check> {
    expect_args(args, 0)?;
    Ok(record_check(|field, fields| {
        let field = field.ok_or("not_empty needs a field")?;
        match fields.get(field) {
            None => Err("field is missing".into()),
            Some(Value::Null) => Err("must not be empty".into()),
            Some(Value::String(s)) if s.trim().is_empty() => Err("must not be empty".into()),
            Some(_) => Ok(()),
        }
    }))
}

// ---------------------------------------------------------------------------
// Equality and membership
// ---------------------------------------------------------------------------

fn equals(args: &[Value]) -> RuleResult<Check> {
    expect_args(args, 1)?;
    let expected = args[0].clone();
    Ok(field_check(move |v| {
        if loose_eq(v, &expected) {
            Ok(())
        } else {
            Err(format!("must equal {}", value_to_text(&expected)))
        }
    }))
}

fn not_equals(args: &[Value]) -> RuleResult<Check> {
    expect_args(args, 1)?;
    let rejected = args[0].clone();
    Ok(field_check(move |v| {
        if loose_eq(v, &rejected) {
            Err(format!("must not equal {}", value_to_text(&rejected)))
        } else {
            Ok(())
        }
    }))
}

fn one_of(args: &[Value]) -> RuleResult<Check> {
    let allowed = arg_nonempty_list(args)?;
    Ok(field_check(move |v| {
        if allowed.iter().any(|a| loose_eq(v, a)) {
            Ok(())
        } else {
            Err(format!("unallowed value {}", value_to_text(v)))
        }
    }))
}

fn not_one_of(args: &[Value]) -> RuleResult<Check> {
    let rejected = arg_nonempty_list(args)?;
    Ok(field_check(move |v| {
        if rejected.iter().any(|r| loose_eq(v, r)) {
            Err(format!("unallowed value {}", value_to_text(v)))
        } else {
            Ok(())
        }
    }))
}

// ---------------------------------------------------------------------------
// Numeric comparison
// ---------------------------------------------------------------------------

/// Compares exact decimals, so `"12.50"` against `12.5` is equal and long
/// amounts keep every digit.
fn compare(label: &'static str, op: fn(Ordering) -> bool) -> RuleFunction {
    RuleFunction::predicate_builder(move |args| {
        expect_args(args, 1)?;
        let bound = arg_decimal(args, 0)?;
        Ok(field_check(move |v| {
            let n = as_decimal(v)
                .ok_or_else(|| format!("expected a number, got {}", type_name(v)))?;
            if op(n.cmp(&bound)) {
                Ok(())
            } else {
                Err(format!("must be {label} {bound}"))
            }
        }))
    })
}

// ---------------------------------------------------------------------------
// Length
// ---------------------------------------------------------------------------

fn length_of(value: &Value) -> RuleResult<usize> {
    match value {
        Value::String(s) => Ok(s.chars().count()),
        Value::Array(items) => Ok(items.len()),
        Value::Null => Ok(0),
        other => Ok(value_to_text(other).chars().count()),
    }
}

fn min_length(args: &[Value]) -> RuleResult<Check> {
    expect_args(args, 1)?;
    let min = arg_usize(args, 0)?;
    Ok(field_check(move |v| {
        if length_of(v)? >= min {
            Ok(())
        } else {
            Err(format!("min length is {min}"))
        }
    }))
}

fn max_length(args: &[Value]) -> RuleResult<Check> {
    expect_args(args, 1)?;
    let max = arg_usize(args, 0)?;
    Ok(field_check(move |v| {
        if length_of(v)? <= max {
            Ok(())
        } else {
            Err(format!("max length is {max}"))
        }
    }))
}

/// `combined_max_length(other, n)`: this field plus `other` together stay
/// within `n` characters. Either field may be missing.
fn combined_max_length(args: &[Value]) -> RuleResult<Check> {
    expect_args(args, 2)?;
    let other = arg_str(args, 0)?;
    let max = arg_usize(args, 1)?;
    Ok(record_check(move |field, fields| {
        let field = field.ok_or("combined_max_length needs a field")?;
        let len = |name: &str| fields.get(name).map(length_of).transpose();
        let total = len(field)?.unwrap_or(0) + len(&other)?.unwrap_or(0);
        if total <= max {
            Ok(())
        } else {
            Err(format!("combined length with {other} is {total}, max is {max}"))
        }
    }))
}

// ---------------------------------------------------------------------------
// Patterns and types
// ---------------------------------------------------------------------------

fn matches(args: &[Value]) -> RuleResult<Check> {
    expect_args(args, 1)?;
    let pattern = arg_str(args, 0)?;
    let re = Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|e| format!("invalid pattern '{pattern}': {e}"))?;
    Ok(field_check(move |v| {
        if re.is_match(&value_to_text(v)) {
            Ok(())
        } else {
            Err(format!("value does not match '{pattern}'"))
        }
    }))
}

fn is_type(args: &[Value]) -> RuleResult<Check> {
    expect_args(args, 1)?;
    let wanted = arg_str(args, 0)?;
    let test: fn(&Value) -> bool = match wanted.as_str() {
        "string" => Value::is_string,
        "number" => Value::is_number,
        "integer" => |v: &Value| v.is_i64() || v.is_u64(),
        "boolean" => Value::is_boolean,
        "null" => Value::is_null,
        "array" => Value::is_array,
        "object" => Value::is_object,
        other => return Err(format!("unknown type '{other}'")),
    };
    Ok(field_check(move |v| {
        if test(v) {
            Ok(())
        } else {
            Err(format!("must be of {wanted} type"))
        }
    }))
}

fn has_only_ascii(value: &Value) -> RuleResult<()> {
    if value_to_text(value).is_ascii() {
        Ok(())
    } else {
        Err("Contains non-ASCII character(s)".into())
    }
}

fn is_upper(value: &Value) -> RuleResult<()> {
    let text = value_to_text(value);
    if text.to_uppercase() == text {
        Ok(())
    } else {
        Err("Should be uppercase".into())
    }
}

/// Backslash-delimited with a leading and trailing backslash, no forward
/// slashes.
fn uds_style_path(value: &Value) -> RuleResult<()> {
    let text = value_to_text(value);
    let ok = text.len() >= 2
        && text.starts_with('\\')
        && text.ends_with('\\')
        && !text.contains('/')
        && !text.contains("\\\\");
    if ok || text == "\\" {
        Ok(())
    } else {
        Err("Must use UDS path standard".into())
    }
}

fn is_numeric(value: &Value) -> RuleResult<()> {
    let text = value_to_text(value);
    if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err("Should be only numbers".into())
    }
}

// ---------------------------------------------------------------------------
// Date/time formats
// ---------------------------------------------------------------------------

const DATAMAPPER_DATE_FORMATS: &[&str] = &[
    "%Y%m%d", "%m/%d/%Y", "%m/%d/%y", "%d %B %Y", "%d %B %y", "%d %b %y",
];

const DATAMAPPER_TIME_FORMATS: &[&str] = &["%I:%M %p", "%I:%M:%S %p", "%H:%M", "%H:%M:%S", "%H%M%S"];

/// True when `text` parses as a date, date-time or time under `fmt`.
fn parses_with(text: &str, fmt: &str) -> bool {
    NaiveDate::parse_from_str(text, fmt).is_ok()
        || NaiveDateTime::parse_from_str(text, fmt).is_ok()
        || NaiveTime::parse_from_str(text, fmt).is_ok()
}

fn date_format_check<S: AsRef<str>>(value: &Value, formats: &[S]) -> RuleResult<()> {
    let text = value_to_text(value);
    if formats.iter().any(|f| parses_with(&text, f.as_ref())) {
        Ok(())
    } else {
        let listed: Vec<&str> = formats.iter().map(|f| f.as_ref()).collect();
        Err(format!("'{text}' does not match any of: {}", listed.join(", ")))
    }
}

fn has_date_format(args: &[Value]) -> RuleResult<Check> {
    let formats = arg_nonempty_list(args)?
        .iter()
        .enumerate()
        .map(|(i, v)| match v {
            Value::String(s) => check_format(s).map(|_| s.clone()),
            other => Err(format!("format {} must be a string, got {other}", i + 1)),
        })
        .collect::<RuleResult<Vec<String>>>()?;
    Ok(field_check(move |v| date_format_check(v, &formats)))
}

// ---------------------------------------------------------------------------
// Characters
// ---------------------------------------------------------------------------

fn does_not_have_char(args: &[Value]) -> RuleResult<Check> {
    expect_args(args, 1)?;
    let needle = arg_str(args, 0)?;
    if needle.is_empty() {
        return Err("argument 1 must not be empty".into());
    }
    Ok(field_check(move |v| {
        if value_to_text(v).contains(needle.as_str()) {
            Err(format!("{needle} not allowed"))
        } else {
            Ok(())
        }
    }))
}

fn no_cr_lf(value: &Value) -> RuleResult<()> {
    if value_to_text(value).contains(['\r', '\n']) {
        Err("Contains CR/LF line break".into())
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cross-field
// ---------------------------------------------------------------------------

/// `fields_differ(a, b)`: the two named fields must not hold equal values.
/// Passes when either is missing.
fn fields_differ(args: &[Value]) -> RuleResult<Check> {
    expect_args(args, 2)?;
    let a = arg_str(args, 0)?;
    let b = arg_str(args, 1)?;
    Ok(record_check(move |_, fields| match (fields.get(&a), fields.get(&b)) {
        (Some(x), Some(y)) if loose_eq(x, y) => Err(format!("{a} and {b} must differ")),
        _ => Ok(()),
    }))
}

fn field_check<F>(f: F) -> Check
where
    F: Fn(&Value) -> RuleResult<()> + Send + Sync + 'static,
{
    Check::Field(Arc::new(f))
}

fn record_check<F>(f: F) -> Check
where
    F: Fn(Option<&str>, &Fields) -> RuleResult<()> + Send + Sync + 'static,
{
    Check::Record(Arc::new(f))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
