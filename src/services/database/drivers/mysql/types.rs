//! MySQL type conversion utilities.
//!
//! This module handles conversion between MySQL-specific types (from SQLx)
//! and the generic `Value` type used across all database drivers.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlArguments, MySqlColumn, MySqlRow, MySqlSslMode};
use sqlx::query::Query;
use sqlx::{Column, MySql, Row, TypeInfo, ValueRef};

use crate::services::database::traits::{Row as ResultRow, SslMode, Value};

/// Converter for MySQL values to the unified `Value` type.
pub struct MySqlValueConverter;

impl MySqlValueConverter {
    /// Convert a MySQL row to a result row.
    pub fn convert_row(mysql_row: &MySqlRow) -> ResultRow {
        let values = mysql_row
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| Self::extract_value(mysql_row, col, idx))
            .collect();

        ResultRow::new(values)
    }

    /// Bind a unified value as the next `?` parameter.
    pub fn bind<'q>(
        query: Query<'q, MySql, MySqlArguments>,
        value: Value,
    ) -> Query<'q, MySql, MySqlArguments> {
        match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(v),
            Value::Int(v) => query.bind(v),
            Value::UInt(v) => query.bind(v),
            Value::Float(v) => query.bind(v),
            Value::Text(v) => query.bind(v),
            Value::Bytes(v) => query.bind(v),
            Value::Date(v) => query.bind(v),
            Value::Time(v) => query.bind(v),
            Value::DateTime(v) => query.bind(v),
            Value::DateTimeTz(v) => query.bind(v),
            Value::Decimal(v) => query.bind(v),
            Value::Json(v) => query.bind(v),
            other => query.bind(other.to_plain_string()),
        }
    }

    /// Extract a value from a MySQL row at the given column index.
    fn extract_value(row: &MySqlRow, column: &MySqlColumn, index: usize) -> Value {
        // Check for NULL first
        match row.try_get_raw(index) {
            Ok(raw) if raw.is_null() => return Value::Null,
            Err(_) => return Value::Null,
            _ => {}
        }

        let type_name = column.type_info().name();
        Self::decode_by_type(row, index, type_name)
    }

    /// Decode a value based on its MySQL type name.
    fn decode_by_type(row: &MySqlRow, index: usize, type_name: &str) -> Value {
        let decoded = match type_name {
            // MySQL reports TINYINT(1) as BOOLEAN
            "BOOLEAN" => row.try_get::<bool, _>(index).map(Value::Bool),

            // Integers
            "TINYINT" => row.try_get::<i8, _>(index).map(|v| Value::Int(v.into())),
            "TINYINT UNSIGNED" => row.try_get::<u8, _>(index).map(|v| Value::Int(v.into())),
            "SMALLINT" => row.try_get::<i16, _>(index).map(|v| Value::Int(v.into())),
            "SMALLINT UNSIGNED" => row.try_get::<u16, _>(index).map(|v| Value::Int(v.into())),
            "MEDIUMINT" | "INT" => row.try_get::<i32, _>(index).map(|v| Value::Int(v.into())),
            "MEDIUMINT UNSIGNED" | "INT UNSIGNED" => {
                row.try_get::<u32, _>(index).map(|v| Value::Int(v.into()))
            }
            "BIGINT" => row.try_get::<i64, _>(index).map(Value::Int),
            "BIGINT UNSIGNED" => row.try_get::<u64, _>(index).map(Value::UInt),
            "YEAR" => row.try_get::<u16, _>(index).map(|v| Value::Int(v.into())),

            // Floating point
            "FLOAT" => row.try_get::<f32, _>(index).map(|v| Value::Float(v.into())),
            "DOUBLE" => row.try_get::<f64, _>(index).map(Value::Float),

            "DECIMAL" => row.try_get::<Decimal, _>(index).map(Value::Decimal),

            // Text types
            "CHAR" | "VARCHAR" | "TINYTEXT" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM"
            | "SET" => row.try_get::<String, _>(index).map(Value::Text),

            // Binary types
            "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" => {
                row.try_get::<Vec<u8>, _>(index).map(Value::Bytes)
            }

            // Date/Time types
            "DATE" => row.try_get::<NaiveDate, _>(index).map(Value::Date),
            "TIME" => row.try_get::<NaiveTime, _>(index).map(Value::Time),
            "DATETIME" => row.try_get::<NaiveDateTime, _>(index).map(Value::DateTime),
            "TIMESTAMP" => row
                .try_get::<DateTime<Utc>, _>(index)
                .map(Value::DateTimeTz)
                .or_else(|_| row.try_get::<NaiveDateTime, _>(index).map(Value::DateTime)),

            "JSON" => row
                .try_get::<serde_json::Value, _>(index)
                .map(Value::Json),

            _ => return Self::decode_as_string_fallback(row, index, type_name),
        };

        decoded.unwrap_or_else(|_| Self::decode_as_string_fallback(row, index, type_name))
    }

    /// Fallback for types without a dedicated mapping (GEOMETRY, vendor types).
    fn decode_as_string_fallback(row: &MySqlRow, index: usize, type_name: &str) -> Value {
        if let Ok(s) = row.try_get_unchecked::<String, _>(index) {
            return Value::Other {
                type_name: type_name.to_string(),
                display: s,
            };
        }

        // Text columns with a binary collation come back as bytes
        if let Ok(bytes) = row.try_get_unchecked::<Vec<u8>, _>(index) {
            return match String::from_utf8(bytes) {
                Ok(s) => Value::Text(s),
                Err(e) => Value::Bytes(e.into_bytes()),
            };
        }

        Value::Other {
            type_name: type_name.to_string(),
            display: "<unknown>".to_string(),
        }
    }

    /// Map the generic SSL mode to sqlx's MySqlSslMode.
    pub fn map_ssl_mode(mode: SslMode) -> MySqlSslMode {
        match mode {
            SslMode::Disable => MySqlSslMode::Disabled,
            SslMode::Allow | SslMode::Prefer => MySqlSslMode::Preferred,
            SslMode::Require => MySqlSslMode::Required,
            SslMode::VerifyCa => MySqlSslMode::VerifyCa,
            SslMode::VerifyFull => MySqlSslMode::VerifyIdentity,
        }
    }
}
