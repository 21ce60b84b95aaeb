//! Wide-column wire format: typed attribute values and conversions to and
//! from plain Rust values and JSON.

use crate::error::{DynaformError, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One attribute value in the storage service's JSON representation,
/// e.g. `{"S": "abc"}` or `{"N": "42"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    S(String),
    N(String),
    B(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    L(Vec<AttributeValue>),
    M(BTreeMap<String, AttributeValue>),
    SS(Vec<String>),
    NS(Vec<String>),
    BS(Vec<String>),
}

/// A stored item or image: attribute name to value.
pub type Item = BTreeMap<String, AttributeValue>;

impl AttributeValue {
    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_n(&self) -> Option<&str> {
        match self {
            AttributeValue::N(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null(true))
    }

    /// Text used when the value forms part of a synthetic key.
    pub fn key_part(&self) -> String {
        match self {
            AttributeValue::S(s) | AttributeValue::N(s) | AttributeValue::B(s) => s.clone(),
            AttributeValue::Bool(b) => b.to_string(),
            AttributeValue::Null(_) => String::new(),
            other => unmarshall_value(other).to_string(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::S(_) => "S",
            AttributeValue::N(_) => "N",
            AttributeValue::B(_) => "B",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::Null(_) => "NULL",
            AttributeValue::L(_) => "L",
            AttributeValue::M(_) => "M",
            AttributeValue::SS(_) => "SS",
            AttributeValue::NS(_) => "NS",
            AttributeValue::BS(_) => "BS",
        }
    }
}

/// Convert a wire item into a plain JSON object.
pub fn unmarshall(item: &Item) -> serde_json::Map<String, serde_json::Value> {
    item.iter()
        .map(|(k, v)| (k.clone(), unmarshall_value(v)))
        .collect()
}

/// Convert one wire value into plain JSON. Numbers that do not parse are
/// kept as strings rather than dropped.
pub fn unmarshall_value(value: &AttributeValue) -> serde_json::Value {
    use serde_json::Value;
    match value {
        AttributeValue::S(s) | AttributeValue::B(s) => Value::String(s.clone()),
        AttributeValue::N(n) => parse_number(n),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::L(items) => Value::Array(items.iter().map(unmarshall_value).collect()),
        AttributeValue::M(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), unmarshall_value(v)))
                .collect(),
        ),
        AttributeValue::SS(items) | AttributeValue::BS(items) => {
            Value::Array(items.iter().cloned().map(Value::String).collect())
        }
        AttributeValue::NS(items) => Value::Array(items.iter().map(|n| parse_number(n)).collect()),
    }
}

fn parse_number(n: &str) -> serde_json::Value {
    if let Ok(i) = n.parse::<i64>() {
        return serde_json::Value::from(i);
    }
    n.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
        .unwrap_or_else(|| serde_json::Value::String(n.to_string()))
}

/// Convert plain JSON into a wire value.
pub fn marshall_value(value: &serde_json::Value) -> AttributeValue {
    use serde_json::Value;
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(marshall_value).collect()),
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| (k.clone(), marshall_value(v)))
                .collect(),
        ),
    }
}

/// Convert a JSON object into a wire item.
pub fn marshall(object: &serde_json::Map<String, serde_json::Value>) -> Item {
    object
        .iter()
        .map(|(k, v)| (k.clone(), marshall_value(v)))
        .collect()
}

/// Values that can be written as an attribute. `None` means "omit".
pub trait ToAttribute {
    fn to_attribute(&self) -> Option<AttributeValue>;
}

/// Values that can be read back from an attribute.
pub trait FromAttribute: Sized {
    fn from_attribute(value: &AttributeValue) -> std::result::Result<Self, String>;
}

impl ToAttribute for String {
    fn to_attribute(&self) -> Option<AttributeValue> {
        Some(AttributeValue::S(self.clone()))
    }
}

impl ToAttribute for str {
    fn to_attribute(&self) -> Option<AttributeValue> {
        Some(AttributeValue::S(self.to_string()))
    }
}

impl<T: ToAttribute + ?Sized> ToAttribute for &T {
    fn to_attribute(&self) -> Option<AttributeValue> {
        (**self).to_attribute()
    }
}

impl FromAttribute for String {
    fn from_attribute(value: &AttributeValue) -> std::result::Result<Self, String> {
        match value {
            AttributeValue::S(s) => Ok(s.clone()),
            other => Err(format!("expected S, found {}", other.type_name())),
        }
    }
}

impl ToAttribute for bool {
    fn to_attribute(&self) -> Option<AttributeValue> {
        Some(AttributeValue::Bool(*self))
    }
}

impl FromAttribute for bool {
    fn from_attribute(value: &AttributeValue) -> std::result::Result<Self, String> {
        match value {
            AttributeValue::Bool(b) => Ok(*b),
            other => Err(format!("expected BOOL, found {}", other.type_name())),
        }
    }
}

impl ToAttribute for i64 {
    fn to_attribute(&self) -> Option<AttributeValue> {
        Some(AttributeValue::N(self.to_string()))
    }
}

impl FromAttribute for i64 {
    fn from_attribute(value: &AttributeValue) -> std::result::Result<Self, String> {
        match value {
            AttributeValue::N(n) => n
                .parse()
                .map_err(|_| format!("`{n}` is not an integer")),
            other => Err(format!("expected N, found {}", other.type_name())),
        }
    }
}

impl ToAttribute for f64 {
    fn to_attribute(&self) -> Option<AttributeValue> {
        Some(AttributeValue::N(self.to_string()))
    }
}

impl FromAttribute for f64 {
    fn from_attribute(value: &AttributeValue) -> std::result::Result<Self, String> {
        match value {
            AttributeValue::N(n) => n.parse().map_err(|_| format!("`{n}` is not a number")),
            other => Err(format!("expected N, found {}", other.type_name())),
        }
    }
}

impl ToAttribute for DateTime<Utc> {
    fn to_attribute(&self) -> Option<AttributeValue> {
        Some(AttributeValue::S(
            self.to_rfc3339_opts(SecondsFormat::Millis, true),
        ))
    }
}

impl FromAttribute for DateTime<Utc> {
    fn from_attribute(value: &AttributeValue) -> std::result::Result<Self, String> {
        match value {
            AttributeValue::S(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| format!("`{s}` is not an RFC 3339 timestamp: {e}")),
            // TTL attributes are stored as epoch seconds.
            AttributeValue::N(n) => n
                .parse::<i64>()
                .ok()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                .ok_or_else(|| format!("`{n}` is not an epoch timestamp")),
            other => Err(format!("expected S, found {}", other.type_name())),
        }
    }
}

impl ToAttribute for NaiveDate {
    fn to_attribute(&self) -> Option<AttributeValue> {
        Some(AttributeValue::S(self.format("%Y-%m-%d").to_string()))
    }
}

impl FromAttribute for NaiveDate {
    fn from_attribute(value: &AttributeValue) -> std::result::Result<Self, String> {
        match value {
            AttributeValue::S(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| format!("`{s}` is not a date: {e}")),
            other => Err(format!("expected S, found {}", other.type_name())),
        }
    }
}

impl ToAttribute for serde_json::Value {
    fn to_attribute(&self) -> Option<AttributeValue> {
        Some(marshall_value(self))
    }
}

impl FromAttribute for serde_json::Value {
    fn from_attribute(value: &AttributeValue) -> std::result::Result<Self, String> {
        Ok(unmarshall_value(value))
    }
}

impl<T: ToAttribute> ToAttribute for Option<T> {
    fn to_attribute(&self) -> Option<AttributeValue> {
        self.as_ref().and_then(ToAttribute::to_attribute)
    }
}

impl<T: ToAttribute> ToAttribute for Vec<T> {
    fn to_attribute(&self) -> Option<AttributeValue> {
        Some(AttributeValue::L(
            self.iter().filter_map(ToAttribute::to_attribute).collect(),
        ))
    }
}

impl<T: FromAttribute> FromAttribute for Vec<T> {
    fn from_attribute(value: &AttributeValue) -> std::result::Result<Self, String> {
        match value {
            AttributeValue::L(items) => items.iter().map(T::from_attribute).collect(),
            AttributeValue::SS(items) | AttributeValue::NS(items) => {
                let wrap: fn(String) -> AttributeValue = if matches!(value, AttributeValue::SS(_)) {
                    AttributeValue::S
                } else {
                    AttributeValue::N
                };
                items.iter().cloned().map(wrap).map(|v| T::from_attribute(&v)).collect()
            }
            other => Err(format!("expected L, found {}", other.type_name())),
        }
    }
}

/// Write `value` under `column` unless it is absent.
pub fn put_attribute<T: ToAttribute + ?Sized>(item: &mut Item, column: &str, value: &T) {
    if let Some(v) = value.to_attribute() {
        item.insert(column.to_string(), v);
    }
}

/// First present, non-null attribute among `columns` (canonical name first,
/// then legacy aliases).
pub fn find_attribute<'a>(item: &'a Item, columns: &[&str]) -> Option<&'a AttributeValue> {
    columns
        .iter()
        .filter_map(|c| item.get(*c))
        .find(|v| !v.is_null())
}

/// Read a required attribute, failing with a data integrity error when it is
/// missing or malformed.
pub fn read_required<T: FromAttribute>(item: &Item, model: &str, columns: &[&str]) -> Result<T> {
    let field = columns.first().copied().unwrap_or_default();
    let value = find_attribute(item, columns)
        .ok_or_else(|| DynaformError::integrity(model, field, "required attribute is missing"))?;
    T::from_attribute(value).map_err(|message| DynaformError::integrity(model, field, message))
}

/// Read an optional attribute; malformed values are still an error.
pub fn read_optional<T: FromAttribute>(
    item: &Item,
    model: &str,
    columns: &[&str],
) -> Result<Option<T>> {
    let field = columns.first().copied().unwrap_or_default();
    match find_attribute(item, columns) {
        None => Ok(None),
        Some(value) => T::from_attribute(value)
            .map(Some)
            .map_err(|message| DynaformError::integrity(model, field, message)),
    }
}

/// Build a synthetic key value: `PREFIX#part1#part2`.
pub fn key_value(prefix: Option<&str>, parts: &[AttributeValue]) -> AttributeValue {
    let mut segments: Vec<String> = prefix.map(str::to_string).into_iter().collect();
    segments.extend(parts.iter().map(AttributeValue::key_part));
    AttributeValue::S(segments.join("#"))
}

/// A key component; absent values become `NULL`.
pub fn key_attribute<T: ToAttribute + ?Sized>(value: &T) -> AttributeValue {
    value.to_attribute().unwrap_or(AttributeValue::Null(true))
}

/// Key value for a sparse index: `None` when any component is absent, so
/// the item stays out of the index.
pub fn sparse_key_value(prefix: Option<&str>, parts: &[Option<AttributeValue>]) -> Option<AttributeValue> {
    let parts = parts.iter().cloned().collect::<Option<Vec<_>>>()?;
    Some(key_value(prefix, &parts))
}

/// Render a key for error messages, e.g. `pk=CUSTOMER#1, sk=ORDER#2`.
pub fn describe_key(key: &Item) -> String {
    key.iter()
        .map(|(k, v)| format!("{k}={}", v.key_part()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Epoch seconds for TTL attributes.
pub fn epoch_seconds(at: &DateTime<Utc>) -> AttributeValue {
    AttributeValue::N(at.timestamp().to_string())
}
