//! Built-in coercions.

use std::sync::{Arc, OnceLock};

use chrono::format::{Item, StrftimeItems};
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use munger_types::{Fields, Value};
use regex::Regex;

use super::{arg_nonempty_list, arg_str, arg_usize, expect_args, type_name};
use crate::registry::{RuleFunction, RuleResult, Transform};

pub(crate) fn catalog() -> Vec<(&'static str, RuleFunction)> {
    vec![
        ("strip", RuleFunction::coercion(|v| text_op(v, |s| s.trim().to_string()))),
        ("upper", RuleFunction::coercion(|v| text_op(v, |s| s.to_uppercase()))),
        ("lower", RuleFunction::coercion(|v| text_op(v, |s| s.to_lowercase()))),
        ("truncate", RuleFunction::coercion_builder(truncate)),
        ("replace", RuleFunction::coercion_builder(replace)),
        ("to_decimal", RuleFunction::coercion(to_decimal)),
        ("to_integer", RuleFunction::coercion(to_integer)),
        ("datetime_to_format", RuleFunction::coercion_builder(datetime_to_format)),
        ("relative_to_folder", RuleFunction::coercion_builder(relative_to_folder)),
        ("get_parent_folder", RuleFunction::coercion(|v| text_try(v, get_parent_folder))),
        ("get_filename", RuleFunction::coercion(|v| text_try(v, get_filename))),
        ("insert_base_folder", RuleFunction::coercion_builder(insert_base_folder)),
        ("extract_file_ext", RuleFunction::coercion(|v| text_op(v, extract_file_ext))),
        ("to_uds_path", RuleFunction::coercion(|v| text_try(v, to_uds_path))),
        ("default", RuleFunction::coercion_builder(default)),
        ("rename", RuleFunction::coercion_builder(rename)),
        ("map_to", RuleFunction::coercion_builder(map_to)),
    ]
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

/// Apply a text rewrite. Null stays null; non-text values are an error.
fn text_op(value: &Value, f: impl Fn(&str) -> String) -> RuleResult<Value> {
    text_try(value, |s| Ok(f(s)))
}

fn text_try(value: &Value, f: impl Fn(&str) -> RuleResult<String>) -> RuleResult<Value> {
    match value {
        Value::String(s) => f(s).map(Value::String),
        Value::Null => Ok(Value::Null),
        other => Err(format!("expected text, got {}", type_name(other))),
    }
}

fn truncate(args: &[Value]) -> RuleResult<Transform> {
    expect_args(args, 1)?;
    let max = arg_usize(args, 0)?;
    Ok(field_transform(move |v| {
        text_op(v, |s| s.chars().take(max).collect())
    }))
}

fn replace(args: &[Value]) -> RuleResult<Transform> {
    expect_args(args, 2)?;
    let from = arg_str(args, 0)?;
    let to = arg_str(args, 1)?;
    if from.is_empty() {
        return Err("argument 1 must not be empty".into());
    }
    Ok(field_transform(move |v| text_op(v, |s| s.replace(&from, &to))))
}

// ---------------------------------------------------------------------------
// Numbers
// ---------------------------------------------------------------------------

/// Decimals stay text: the canonical digits of the parsed value, with the
/// input's scale kept (`"12.50"` stays `12.50`, `" +5 "` becomes `5`).
fn to_decimal(value: &Value) -> RuleResult<Value> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Err("empty value is not a decimal".into());
            }
            trimmed
                .parse::<BigDecimal>()
                .map(|d| Value::String(d.to_string()))
                .map_err(|_| format!("'{s}' is not a decimal"))
        }
        other => Err(format!("cannot convert {} to a decimal", type_name(other))),
    }
}

fn to_integer(value: &Value) -> RuleResult<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Value::from(f as i64)),
            _ => Err(format!("{n} is not a whole number")),
        },
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("'{s}' is not an integer")),
        other => Err(format!("cannot convert {} to an integer", type_name(other))),
    }
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M %p",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%Y%m%d",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
    "%d %b %Y",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M", "%I:%M %p", "%I:%M:%S %p"];

/// Best-effort parse of the date/time spellings found in manual extracts.
/// Ordinal suffixes (`4th`) are dropped first; time-only input lands on
/// 1970-01-01.
pub(crate) fn parse_loose_datetime(input: &str) -> Option<NaiveDateTime> {
    static ORDINAL: OnceLock<Option<Regex>> = OnceLock::new();
    let ordinal = ORDINAL
        .get_or_init(|| Regex::new(r"(\d)(st|nd|rd|th)\b").ok())
        .as_ref()?;
    let cleaned = ordinal.replace_all(input.trim(), "$1");
    let s = cleaned.as_ref();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    for fmt in TIME_FORMATS {
        if let Ok(t) = NaiveTime::parse_from_str(s, fmt) {
            return NaiveDate::from_ymd_opt(1970, 1, 1).map(|d| d.and_time(t));
        }
    }
    None
}

/// Reject strftime strings chrono cannot render.
pub(crate) fn check_format(fmt: &str) -> RuleResult<()> {
    if StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error)) {
        Err(format!("invalid date format '{fmt}'"))
    } else {
        Ok(())
    }
}

fn datetime_to_format(args: &[Value]) -> RuleResult<Transform> {
    expect_args(args, 1)?;
    let fmt = arg_str(args, 0)?;
    check_format(&fmt)?;
    Ok(field_transform(move |v| {
        text_try(v, |s| {
            parse_loose_datetime(s)
                .map(|dt| dt.format(&fmt).to_string())
                .ok_or_else(|| format!("'{s}' is not a recognizable date or time"))
        })
    }))
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// A path split on either separator. Remembers which separator the input
/// used so the rewrite keeps the same style.
struct SplitPath<'a> {
    sep: char,
    rooted: bool,
    parts: Vec<&'a str>,
}

impl<'a> SplitPath<'a> {
    fn new(path: &'a str) -> Self {
        let sep = if path.contains('\\') { '\\' } else { '/' };
        Self {
            sep,
            rooted: path.starts_with(['/', '\\']),
            parts: path.split(['/', '\\']).filter(|p| !p.is_empty()).collect(),
        }
    }

    fn join(&self, parts: &[&str], rooted: bool) -> String {
        let body = parts.join(self.sep.to_string().as_str());
        if rooted {
            format!("{}{body}", self.sep)
        } else {
            body
        }
    }
}

fn relative_to_folder(args: &[Value]) -> RuleResult<Transform> {
    expect_args(args, 1)?;
    let folder = arg_str(args, 0)?;
    Ok(field_transform(move |v| {
        text_try(v, |s| {
            let path = SplitPath::new(s);
            let base = SplitPath::new(&folder);
            if path.parts.len() < base.parts.len()
                || path.parts[..base.parts.len()] != base.parts[..]
            {
                return Err(format!("'{s}' is not inside '{folder}'"));
            }
            Ok(path.join(&path.parts[base.parts.len()..], false))
        })
    }))
}

fn get_parent_folder(value: &str) -> RuleResult<String> {
    let path = SplitPath::new(value);
    match path.parts.split_last() {
        Some((_, parent)) => Ok(path.join(parent, path.rooted)),
        None => Err("path has no components".into()),
    }
}

fn get_filename(value: &str) -> RuleResult<String> {
    SplitPath::new(value)
        .parts
        .last()
        .map(|s| s.to_string())
        .ok_or_else(|| "path has no file name".to_string())
}

fn insert_base_folder(args: &[Value]) -> RuleResult<Transform> {
    expect_args(args, 1)?;
    let base = arg_str(args, 0)?;
    Ok(field_transform(move |v| {
        text_op(v, |s| {
            let root = SplitPath::new(&base);
            let rest = SplitPath::new(s);
            let mut parts = root.parts.clone();
            parts.extend(rest.parts.iter().copied());
            let sep = if base.contains('\\') || s.contains('\\') { '\\' } else { '/' };
            let joined = parts.join(sep.to_string().as_str());
            if root.rooted {
                format!("{sep}{joined}")
            } else {
                joined
            }
        })
    }))
}

fn extract_file_ext(value: &str) -> String {
    let name = SplitPath::new(value).parts.last().copied().unwrap_or_default();
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_uppercase(),
        _ => String::new(),
    }
}

/// Backslash-delimited path with a leading and trailing backslash.
fn to_uds_path(value: &str) -> RuleResult<String> {
    if value.is_empty() {
        return Err("empty path".into());
    }
    let mut path = value.replace('/', "\\");
    if !path.starts_with('\\') {
        path.insert(0, '\\');
    }
    if !path.ends_with('\\') {
        path.push('\\');
    }
    Ok(path)
}

// ---------------------------------------------------------------------------
// Structural record transforms
// ---------------------------------------------------------------------------

/// Fill a missing, null or blank field with a fixed value.
fn default(args: &[Value]) -> RuleResult<Transform> {
    expect_args(args, 1)?;
    let fill = args[0].clone();
    Ok(record_transform(move |field, fields| {
        let field = field.ok_or("default needs a field")?;
        let blank = match fields.get(field) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        };
        if blank {
            fields.insert(field.to_string(), fill.clone());
        }
        Ok(())
    }))
}

/// Move a field to a new name at the end of the record.
fn rename(args: &[Value]) -> RuleResult<Transform> {
    expect_args(args, 1)?;
    let target = arg_str(args, 0)?;
    Ok(record_transform(move |field, fields| {
        let field = field.ok_or("rename needs a field")?;
        move_field(fields, field, &target);
        Ok(())
    }))
}

/// Copy a field to several names. The first target replaces the field and is
/// appended, unless it is the field itself; the others are appended copies.
fn map_to(args: &[Value]) -> RuleResult<Transform> {
    let targets = arg_nonempty_list(args)?
        .iter()
        .enumerate()
        .map(|(i, v)| match v {
            Value::String(s) if !s.is_empty() => Ok(s.clone()),
            other => Err(format!("target {} must be a field name, got {other}", i + 1)),
        })
        .collect::<RuleResult<Vec<String>>>()?;
    let Some((first, copies)) = targets.split_first() else {
        return Err("expects at least 1 target".into());
    };
    let (first, copies) = (first.clone(), copies.to_vec());
    Ok(record_transform(move |field, fields| {
        let field = field.ok_or("map_to needs a field")?;
        let Some(value) = fields.get(field).cloned() else {
            return Ok(());
        };
        move_field(fields, field, &first);
        for target in &copies {
            fields.insert(target.clone(), value.clone());
        }
        Ok(())
    }))
}

/// Rebuild the map without `from` and append its value under `to`. A missing
/// `from` leaves the record alone.
fn move_field(fields: &mut Fields, from: &str, to: &str) {
    if from == to {
        return;
    }
    let Some(value) = fields.get(from).cloned() else {
        return;
    };
    let mut rebuilt = Fields::new();
    for (key, v) in std::mem::take(fields) {
        if key != from && key != to {
            rebuilt.insert(key, v);
        }
    }
    rebuilt.insert(to.to_string(), value);
    *fields = rebuilt;
}

fn field_transform<F>(f: F) -> Transform
where
    F: Fn(&Value) -> RuleResult<Value> + Send + Sync + 'static,
{
    Transform::Field(Arc::new(f))
}

fn record_transform<F>(f: F) -> Transform
where
    F: Fn(Option<&str>, &mut Fields) -> RuleResult<()> + Send + Sync + 'static,
{
    Transform::Record(Arc::new(f))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
