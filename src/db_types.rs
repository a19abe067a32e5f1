// =====================================================
// COMMON TRANSFER TYPES AND STRUCTURES
// =====================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// --- Connection Descriptor ---

/// Identity and credentials of one remote ClickHouse endpoint. Two descriptors
/// with identical fields share one pooled handle.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(default, alias = "jwtToken", alias = "password")]
    pub credential: String,
}

impl ConnectionDescriptor {
    /// `http://` unless the host names a scheme; `port` unless the host
    /// already carries one.
    pub fn base_url(&self) -> String {
        let host = self.host.trim().trim_end_matches('/');
        let (scheme, rest) = match host.split_once("://") {
            Some((scheme, rest)) => (scheme, rest),
            None => ("http", host),
        };
        let (authority, path) = match rest.find('/') {
            Some(index) => rest.split_at(index),
            None => (rest, ""),
        };
        if authority_has_port(authority) {
            format!("{}://{}{}", scheme, authority, path)
        } else {
            format!("{}://{}:{}{}", scheme, authority, self.port, path)
        }
    }

    pub fn display_label(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }
}

// `[::1]` is a bare IPv6 literal; `[::1]:8123` and `host:8123` carry a port.
fn authority_has_port(authority: &str) -> bool {
    let host_end = authority.rfind(']').map(|index| index + 1).unwrap_or(0);
    match authority[host_end..].rsplit_once(':') {
        Some((_, port)) => !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("credential", &"***")
            .finish()
    }
}

// --- Column Descriptor ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub default_kind: Option<String>,
    pub default_expression: Option<String>,
}

// --- Validation Response ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ValidationResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
        }
    }
}

// --- Row Values ---

/// Scalar both ClickHouse and a delimited file can carry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Untyped JSON scalar. Composite values keep their JSON text.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(v) => Value::Bool(v),
            serde_json::Value::Number(number) => {
                if let Some(v) = number.as_i64() {
                    Value::Int(v)
                } else if number.as_u64().is_some() {
                    // u64 above i64::MAX
                    Value::Text(number.to_string())
                } else {
                    number
                        .as_f64()
                        .map(Value::Float)
                        .unwrap_or_else(|| Value::Text(number.to_string()))
                }
            }
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Text(other.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(v) => serde_json::Value::Bool(*v),
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Timestamp(ts) => serde_json::Value::String(format_timestamp(ts)),
            Value::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

/// ClickHouse's own DateTime text form; fractional part only when present.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Timestamp(ts) => write!(f, "{}", format_timestamp(ts)),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

/// Column order only matters at the serialization boundary.
pub type Row = BTreeMap<String, Value>;
