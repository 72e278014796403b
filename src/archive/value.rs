use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

/// Declared type of an archive column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    String,
    Integer,
    Boolean,
    Timestamp,
    /// Photographic ratio such as an exposure time, kept as numerator/denominator.
    Fraction,
    Binary,
}

impl ColumnKind {
    /// Maps a declared SQLite column type onto an archive kind.
    pub fn from_declared_type(declared: &str) -> ColumnKind {
        let upper = declared.trim().to_ascii_uppercase();
        if upper.starts_with("BOOL") {
            ColumnKind::Boolean
        } else if upper.starts_with("TIMESTAMP") || upper.starts_with("DATETIME") {
            ColumnKind::Timestamp
        } else if upper.starts_with("FRACTION") {
            ColumnKind::Fraction
        } else if upper.contains("INT") {
            ColumnKind::Integer
        } else if upper.contains("BLOB") {
            ColumnKind::Binary
        } else {
            ColumnKind::String
        }
    }

    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnKind::String => "TEXT",
            ColumnKind::Integer => "INTEGER",
            ColumnKind::Boolean => "BOOLEAN",
            ColumnKind::Timestamp => "TIMESTAMP",
            ColumnKind::Fraction => "FRACTION",
            ColumnKind::Binary => "BLOB",
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnKind::String => "string",
            ColumnKind::Integer => "integer",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Timestamp => "timestamp",
            ColumnKind::Fraction => "fraction",
            ColumnKind::Binary => "binary",
        };
        f.write_str(name)
    }
}

/// One cell of an archive row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    String(String),
    Integer(i64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Fraction { numerator: i64, denominator: i64 },
    Binary(Vec<u8>),
}

impl Value {
    pub fn kind(&self) -> Option<ColumnKind> {
        match self {
            Value::Null => None,
            Value::String(_) => Some(ColumnKind::String),
            Value::Integer(_) => Some(ColumnKind::Integer),
            Value::Boolean(_) => Some(ColumnKind::Boolean),
            Value::Timestamp(_) => Some(ColumnKind::Timestamp),
            Value::Fraction { .. } => Some(ColumnKind::Fraction),
            Value::Binary(_) => Some(ColumnKind::Binary),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn text(value: impl Into<String>) -> Value {
        Value::String(value.into())
    }

    /// `Null` for `None`, otherwise a string value.
    pub fn opt_text(value: Option<&str>) -> Value {
        value.map(Value::text).unwrap_or(Value::Null)
    }

    /// Encodes for the exchange document.
    pub(crate) fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Integer(v) => json!(v),
            Value::Boolean(v) => JsonValue::Bool(*v),
            Value::Timestamp(ts) => JsonValue::String(format_timestamp(ts)),
            Value::Fraction {
                numerator,
                denominator,
            } => json!({ "n": numerator, "d": denominator }),
            Value::Binary(bytes) => JsonValue::String(BASE64.encode(bytes)),
        }
    }

    /// Decodes a document cell against its column's declared kind.
    pub(crate) fn from_json(kind: ColumnKind, raw: &JsonValue) -> Result<Value, String> {
        if raw.is_null() {
            return Ok(Value::Null);
        }
        match kind {
            ColumnKind::String => raw
                .as_str()
                .map(Value::text)
                .ok_or_else(|| format!("expected string, found {raw}")),
            ColumnKind::Integer => raw
                .as_i64()
                .map(Value::Integer)
                .ok_or_else(|| format!("expected integer, found {raw}")),
            ColumnKind::Boolean => raw
                .as_bool()
                .map(Value::Boolean)
                .ok_or_else(|| format!("expected boolean, found {raw}")),
            ColumnKind::Timestamp => {
                let text = raw
                    .as_str()
                    .ok_or_else(|| format!("expected timestamp string, found {raw}"))?;
                parse_timestamp(text).map(Value::Timestamp)
            }
            ColumnKind::Fraction => {
                let numerator = raw.get("n").and_then(JsonValue::as_i64);
                let denominator = raw.get("d").and_then(JsonValue::as_i64);
                match (numerator, denominator) {
                    (Some(numerator), Some(denominator)) => Ok(Value::Fraction {
                        numerator,
                        denominator,
                    }),
                    _ => Err(format!("expected {{\"n\",\"d\"}} fraction, found {raw}")),
                }
            }
            ColumnKind::Binary => {
                let text = raw
                    .as_str()
                    .ok_or_else(|| format!("expected base64 string, found {raw}"))?;
                BASE64
                    .decode(text)
                    .map(Value::Binary)
                    .map_err(|err| format!("invalid base64: {err}"))
            }
        }
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| format!("invalid timestamp {text:?}: {err}"))
}

/// Stored form of a fraction column (`"1/250"`).
pub fn format_fraction(numerator: i64, denominator: i64) -> String {
    format!("{numerator}/{denominator}")
}

pub fn parse_fraction(text: &str) -> Option<(i64, i64)> {
    let (n, d) = text.split_once('/')?;
    Some((n.trim().parse().ok()?, d.trim().parse().ok()?))
}
