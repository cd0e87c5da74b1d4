//! In-process evaluation of filters and ordering over JSON rows.
//!
//! Comparison follows SQL: a null on either side never matches, values of
//! different JSON types are incomparable, and nulls sort last ascending.

use std::cmp::Ordering;

use regex::Regex;
use repokit_core::{Direction, Filter, Order, Row};
use serde_json::Value;

use super::MemoryStoreError;

/// A filter ready to be evaluated against rows.
#[derive(Debug)]
pub(super) struct Predicate {
    filter: Filter,
    pattern: Option<Regex>,
}

impl Predicate {
    pub(super) fn compile(filter: Filter) -> Result<Self, MemoryStoreError> {
        let pattern = match &filter {
            Filter::Like(_, pattern) => Some(like_to_regex(pattern).map_err(|e| {
                MemoryStoreError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                }
            })?),
            _ => None,
        };
        Ok(Self { filter, pattern })
    }

    pub(super) fn compile_all(filters: Vec<Filter>) -> Result<Vec<Self>, MemoryStoreError> {
        filters.into_iter().map(Self::compile).collect()
    }

    pub(super) fn matches(&self, row: &Row) -> bool {
        let value = row.get(self.filter.column()).unwrap_or(&Value::Null);
        match &self.filter {
            Filter::Eq(_, v) => equal(value, v),
            Filter::Ne(_, v) => !value.is_null() && !v.is_null() && !equal(value, v),
            Filter::Gt(_, v) => compare(value, v) == Some(Ordering::Greater),
            Filter::Gte(_, v) => matches!(compare(value, v), Some(Ordering::Greater | Ordering::Equal)),
            Filter::Lt(_, v) => compare(value, v) == Some(Ordering::Less),
            Filter::Lte(_, v) => matches!(compare(value, v), Some(Ordering::Less | Ordering::Equal)),
            Filter::In(_, values) => values.iter().any(|v| equal(value, v)),
            Filter::Like(..) => match (as_text(value), &self.pattern) {
                (Some(text), Some(pattern)) => pattern.is_match(&text),
                _ => false,
            },
            Filter::IsNull(_) => value.is_null(),
            Filter::NotNull(_) => !value.is_null(),
        }
    }
}

pub(super) fn matches_all(predicates: &[Predicate], row: &Row) -> bool {
    predicates.iter().all(|p| p.matches(row))
}

/// Translate a LIKE pattern. `\` escapes the next character.
pub(super) fn like_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str("(?s)^");
    let mut escaped = false;
    for c in pattern.chars() {
        if escaped {
            re.push_str(&regex::escape(&c.to_string()));
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    if escaped {
        re.push_str(&regex::escape("\\"));
    }
    re.push('$');
    Regex::new(&re)
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub(super) fn equal(a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    match compare(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}

pub(super) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => Some(i.cmp(&j)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn sort_key_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
    }
}

/// Stable sort by `order`; rows equal on every column keep their position.
pub(super) fn sort_rows(rows: &mut [Row], order: &[Order]) {
    if order.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for o in order {
            let ordering = sort_key_cmp(a.get(&o.column), b.get(&o.column));
            let ordering = match o.direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}
