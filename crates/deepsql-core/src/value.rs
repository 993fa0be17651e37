//! Dynamic SQL values.

use crate::types::SqlType;
use serde::{Deserialize, Serialize};

/// A dynamically-typed SQL value.
///
/// This enum represents all values bound to low-level statements and
/// returned by executors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 32-bit signed integer
    Int(i32),

    /// 64-bit signed integer
    BigInt(i64),

    /// 64-bit floating point
    Double(f64),

    /// Arbitrary precision decimal (stored as string)
    Decimal(String),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// UUID (as 16 bytes)
    Uuid([u8; 16]),

    /// JSON value
    Json(serde_json::Value),

    /// SQL DEFAULT keyword
    Default,
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is the DEFAULT keyword.
    pub const fn is_default(&self) -> bool {
        matches!(self, Value::Default)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Uuid(_) => "UUID",
            Value::Json(_) => "JSON",
            Value::Default => "DEFAULT",
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Compare two values the way a database compares them in `=`.
    ///
    /// Integer widths compare numerically and a UUID equals its hyphenated
    /// text form. NULL never equals anything, including NULL.
    pub fn sql_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Uuid(a), Value::Text(b)) | (Value::Text(b), Value::Uuid(a)) => {
                parse_uuid(b).is_some_and(|parsed| parsed == *a)
            }
            (Value::Double(a), b) | (b, Value::Double(a)) => {
                b.as_i64().map_or_else(|| self == other, |i| (*a - i as f64).abs() < f64::EPSILON)
            }
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => x == y,
                _ => a == b,
            },
        }
    }

    /// Convert a JSON payload value into a value of the given SQL type.
    ///
    /// Values that cannot be coerced keep their JSON shape so the executor
    /// reports the mismatch instead of the planner silently dropping data.
    pub fn from_json(json: &serde_json::Value, sql_type: &SqlType) -> Self {
        use serde_json::Value as Json;
        match (json, sql_type) {
            (Json::Null, _) => Value::Null,
            (Json::Bool(b), _) => Value::Bool(*b),
            (Json::Number(n), SqlType::SmallInt | SqlType::Integer) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map_or_else(|| Value::Json(json.clone()), Value::Int),
            (Json::Number(n), SqlType::BigInt) => n
                .as_i64()
                .map_or_else(|| Value::Json(json.clone()), Value::BigInt),
            (Json::Number(n), SqlType::Decimal { .. }) => Value::Decimal(n.to_string()),
            (Json::Number(n), _) => {
                if let Some(i) = n.as_i64() {
                    Value::BigInt(i)
                } else {
                    n.as_f64().map_or_else(|| Value::Json(json.clone()), Value::Double)
                }
            }
            (Json::String(s), SqlType::Uuid) => {
                parse_uuid(s).map_or_else(|| Value::Text(s.clone()), Value::Uuid)
            }
            (Json::String(s), SqlType::Decimal { .. }) => Value::Decimal(s.clone()),
            (Json::String(s), _) => Value::Text(s.clone()),
            (other, _) => Value::Json(other.clone()),
        }
    }

    /// Convert this value back into its JSON payload representation.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null | Value::Default => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(v) => Json::from(*v),
            Value::BigInt(v) => Json::from(*v),
            Value::Double(v) => Json::from(*v),
            Value::Decimal(s) => s
                .parse::<serde_json::Number>()
                .map_or_else(|_| Json::String(s.clone()), Json::Number),
            Value::Text(s) => Json::String(s.clone()),
            Value::Bytes(b) => Json::Array(b.iter().map(|byte| Json::from(*byte)).collect()),
            Value::Uuid(u) => Json::String(format_uuid(u)),
            Value::Json(j) => j.clone(),
        }
    }
}

/// Format 16 bytes as a hyphenated lowercase UUID string.
pub fn format_uuid(bytes: &[u8; 16]) -> String {
    let mut out = String::with_capacity(36);
    for (i, byte) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Parse a hyphenated (or bare 32 hex digit) UUID string.
pub fn parse_uuid(s: &str) -> Option<[u8; 16]> {
    let hex: String = s.chars().filter(|c| *c != '-').collect();
    if hex.len() != 32 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let mut out = [0u8; 16];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<[u8; 16]> for Value {
    fn from(v: [u8; 16]) -> Self {
        Value::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
