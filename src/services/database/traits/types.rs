//! Driver type definitions and connection inputs.
//!
//! This module contains:
//! - `DriverType` - Enum of supported backends
//! - `SslMode` - Generic SSL negotiation modes
//! - `ConnectionField` / `FieldType` - The input schema each driver declares
//! - `DriverParams` - The generic key/value config a driver connects with
//! - `QueryParams` - Positional or named query parameters

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::row::Value;

/// Supported backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriverType {
    #[default]
    #[serde(alias = "sqlite3")]
    Sqlite,
    #[serde(rename = "postgresql", alias = "postgres")]
    PostgreSQL,
    #[serde(rename = "mysql", alias = "mariadb")]
    MySQL,
    #[serde(rename = "dynamodb")]
    DynamoDB,
    Redis,
}

impl DriverType {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Sqlite => "SQLite",
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL / MariaDB",
            Self::DynamoDB => "Amazon DynamoDB",
            Self::Redis => "Redis",
        }
    }

    /// Default port for network backends, 0 for embedded ones
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Sqlite => 0,
            Self::PostgreSQL => 5432,
            Self::MySQL => 3306,
            Self::DynamoDB => 443,
            Self::Redis => 6379,
        }
    }

    pub fn icon_name(&self) -> &'static str {
        match self {
            Self::Sqlite => "file",
            Self::Redis => "key",
            Self::DynamoDB => "cloud",
            Self::PostgreSQL | Self::MySQL => "database",
        }
    }

    pub fn is_file_based(&self) -> bool {
        matches!(self, Self::Sqlite)
    }

    pub fn all() -> Vec<DriverType> {
        vec![
            Self::Sqlite,
            Self::PostgreSQL,
            Self::MySQL,
            Self::DynamoDB,
            Self::Redis,
        ]
    }

    /// Parse from a string representation
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            "postgresql" | "postgres" | "pg" => Some(Self::PostgreSQL),
            "mysql" | "mariadb" => Some(Self::MySQL),
            "dynamodb" | "dynamo" => Some(Self::DynamoDB),
            "redis" => Some(Self::Redis),
            _ => None,
        }
    }

    /// Storage string, matching the serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::PostgreSQL => "postgresql",
            Self::MySQL => "mysql",
            Self::DynamoDB => "dynamodb",
            Self::Redis => "redis",
        }
    }
}

impl std::fmt::Display for DriverType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// SSL mode options (generic across databases)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    /// No SSL connection
    Disable,
    /// Try non-SSL first, fall back to SSL
    Allow,
    /// Try SSL first, fall back to non-SSL
    #[default]
    Prefer,
    /// Require SSL, don't verify certificates
    Require,
    /// Require SSL and verify server certificate
    VerifyCa,
    /// Require SSL, verify certificate and hostname
    VerifyFull,
}

impl SslMode {
    /// Parse a stored mode string; unknown values fall back to `Prefer`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "disable" => Self::Disable,
            "allow" => Self::Allow,
            "require" => Self::Require,
            "verify-ca" | "verify_ca" => Self::VerifyCa,
            "verify-full" | "verify_full" => Self::VerifyFull,
            _ => Self::Prefer,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Allow => "allow",
            Self::Prefer => "prefer",
            Self::Require => "require",
            Self::VerifyCa => "verify-ca",
            Self::VerifyFull => "verify-full",
        }
    }
}

/// Input widget kind for a connection field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Password,
    Number,
    File,
    Dropdown,
    Checkbox,
}

/// One input a driver needs to connect, as presented by a connection editor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionField {
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    pub required: bool,
    #[serde(default)]
    pub default: Option<JsonValue>,
    /// Choices for dropdown fields
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub placeholder: String,
    #[serde(default)]
    pub tooltip: String,
}

impl ConnectionField {
    pub fn new(name: &str, label: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            field_type,
            required: false,
            default: None,
            options: Vec::new(),
            placeholder: String::new(),
            tooltip: String::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<JsonValue>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|o| o.to_string()).collect();
        self
    }

    pub fn with_placeholder(mut self, placeholder: &str) -> Self {
        self.placeholder = placeholder.to_string();
        self
    }

    pub fn with_tooltip(mut self, tooltip: &str) -> Self {
        self.tooltip = tooltip.to_string();
        self
    }
}

/// Generic connection parameters handed to `DatabaseDriver::connect`.
///
/// Produced by the connection manager from a saved profile (plus the stored
/// secret, if any). Values are loosely typed so extra backend-specific keys
/// pass through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverParams(Map<String, JsonValue>);

impl DriverParams {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn with(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<JsonValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    /// Non-empty string value for `key`
    pub fn str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    /// String value for `key`, or `default` when missing or empty
    pub fn string_or(&self, key: &str, default: &str) -> String {
        self.str(key).unwrap_or(default).to_string()
    }

    /// Integer value for `key`; numeric strings are accepted
    pub fn i64(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            JsonValue::Number(n) => n.as_i64(),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Port for `key`; zero, negative or oversized values count as unset
    pub fn port(&self, key: &str) -> Option<u16> {
        self.i64(key)
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p != 0)
    }

    /// Boolean value for `key`; accepts JSON booleans, 0/1 and "true"/"false"
    pub fn bool(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(JsonValue::Bool(b)) => *b,
            Some(JsonValue::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
            Some(JsonValue::String(s)) => {
                matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
            }
            _ => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }
}

/// Query parameters in the caller's shape; drivers translate to native placeholders.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParams {
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl QueryParams {
    pub fn is_empty(&self) -> bool {
        match self {
            QueryParams::Positional(values) => values.is_empty(),
            QueryParams::Named(values) => values.is_empty(),
        }
    }

    /// Values in declaration order, names dropped
    pub fn values(&self) -> Vec<Value> {
        match self {
            QueryParams::Positional(values) => values.clone(),
            QueryParams::Named(values) => values.iter().map(|(_, v)| v.clone()).collect(),
        }
    }
}
