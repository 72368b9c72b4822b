//! Column filter values and their tagged serialization
//!
//! Pattern-matching filters are not JSON-safe: serializing a compiled
//! pattern naively loses it. Before a filter value is stored in the
//! provenance graph it is converted to an explicit tagged form
//! (`{"filter": {"value": ..., "isRegExp": ...}, "filterMissing": ...}`)
//! and converted back on replay. Restoring also accepts the legacy shapes
//! older histories contain: a bare string, a bare list, `null`, or a bare
//! `{value, isRegExp}` object.

use regex::Regex;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("unknown filter format: {0}")]
    UnknownFormat(Value),
    #[error("filter value is not restorable as a pattern: {0}")]
    NotRestorable(Value),
    #[error("invalid filter pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Live value of a string/categorical column filter.
#[derive(Debug, Clone)]
pub enum FilterValue {
    /// No value constraint (the filter may still exclude missing values).
    Null,
    Text(String),
    List(Vec<String>),
    Pattern(Regex),
}

impl PartialEq for FilterValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FilterValue::Null, FilterValue::Null) => true,
            (FilterValue::Text(a), FilterValue::Text(b)) => a == b,
            (FilterValue::List(a), FilterValue::List(b)) => a == b,
            (FilterValue::Pattern(a), FilterValue::Pattern(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

/// Full filter state of a column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnFilter {
    pub value: FilterValue,
    pub filter_missing: bool,
}

impl ColumnFilter {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: FilterValue::Text(value.into()),
            filter_missing: false,
        }
    }

    pub fn pattern(pattern: &str) -> Result<Self, FilterError> {
        Ok(Self {
            value: FilterValue::Pattern(Regex::new(pattern)?),
            filter_missing: false,
        })
    }
}

fn serialize_value(value: &FilterValue) -> Value {
    let (raw, is_pattern) = match value {
        FilterValue::Null => (Value::Null, false),
        FilterValue::Text(s) => (json!(s), false),
        FilterValue::List(items) => (json!(items), false),
        FilterValue::Pattern(re) => (json!(re.as_str()), true),
    };
    json!({ "value": raw, "isRegExp": is_pattern })
}

/// Convert a live filter to the tagged form stored in the graph.
///
/// `None` serializes to `null` so an unset filter stays distinguishable from
/// a filter that only excludes missing values.
pub fn serialize_filter(filter: Option<&ColumnFilter>) -> Value {
    match filter {
        None => Value::Null,
        Some(f) => json!({
            "filter": serialize_value(&f.value),
            "filterMissing": f.filter_missing,
        }),
    }
}

fn plain_value(value: &Value) -> Option<FilterValue> {
    match value {
        Value::Null => Some(FilterValue::Null),
        Value::String(s) => Some(FilterValue::Text(s.clone())),
        Value::Array(items) => {
            let mut list = Vec::with_capacity(items.len());
            for item in items {
                list.push(item.as_str()?.to_string());
            }
            Some(FilterValue::List(list))
        }
        _ => None,
    }
}

fn is_tagged_value(value: &Value) -> bool {
    value.get("value").is_some() && value.get("isRegExp").is_some()
}

fn restore_value(value: &Value) -> Result<FilterValue, FilterError> {
    if let Some(plain) = plain_value(value) {
        return Ok(plain);
    }
    if is_tagged_value(value) {
        let raw = &value["value"];
        if value["isRegExp"] == json!(true) {
            let pattern = raw
                .as_str()
                .ok_or_else(|| FilterError::NotRestorable(raw.clone()))?;
            return Ok(FilterValue::Pattern(Regex::new(pattern)?));
        }
        return plain_value(raw).ok_or_else(|| FilterError::UnknownFormat(raw.clone()));
    }
    Err(FilterError::UnknownFormat(value.clone()))
}

/// Restore a filter from any accepted serialized shape.
///
/// Unknown shapes are a hard error, never silently ignored.
pub fn restore_filter(value: &Value) -> Result<Option<ColumnFilter>, FilterError> {
    if value.is_null() {
        return Ok(None);
    }
    // full shape: {filter, filterMissing}
    if let Some(inner) = value.get("filter") {
        let filter_missing = value
            .get("filterMissing")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        return Ok(Some(ColumnFilter {
            value: restore_value(inner)?,
            filter_missing,
        }));
    }
    // legacy shapes: bare value or bare tagged value
    Ok(Some(ColumnFilter {
        value: restore_value(value)?,
        filter_missing: false,
    }))
}
