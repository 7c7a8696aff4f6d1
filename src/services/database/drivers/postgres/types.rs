//! PostgreSQL type conversion utilities.
//!
//! This module handles conversion between PostgreSQL-specific types (from SQLx)
//! and the generic `Value` type used across all database drivers.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgColumn, PgRow, PgSslMode};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row, TypeInfo, ValueRef};
use uuid::Uuid;

use crate::services::database::traits::{Row as ResultRow, SslMode, Value};

/// Converter for PostgreSQL values to the unified `Value` type.
pub struct PgValueConverter;

impl PgValueConverter {
    /// Convert a PostgreSQL row to a result row.
    pub fn convert_row(pg_row: &PgRow) -> ResultRow {
        let values = pg_row
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| Self::extract_value(pg_row, col, idx))
            .collect();

        ResultRow::new(values)
    }

    /// Bind a unified value as the next `$n` parameter.
    pub fn bind<'q>(
        query: Query<'q, Postgres, PgArguments>,
        value: Value,
    ) -> Query<'q, Postgres, PgArguments> {
        match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(v),
            Value::Int(v) => query.bind(v),
            Value::UInt(v) => match i64::try_from(v) {
                Ok(v) => query.bind(v),
                Err(_) => query.bind(Decimal::from(v)),
            },
            Value::Float(v) => query.bind(v),
            Value::Text(v) => query.bind(v),
            Value::Bytes(v) => query.bind(v),
            Value::Date(v) => query.bind(v),
            Value::Time(v) => query.bind(v),
            Value::DateTime(v) => query.bind(v),
            Value::DateTimeTz(v) => query.bind(v),
            Value::Decimal(v) => query.bind(v),
            Value::Uuid(v) => query.bind(v),
            Value::Json(v) => query.bind(v),
            other => query.bind(other.to_plain_string()),
        }
    }

    /// Extract a value from a PostgreSQL row at the given column index.
    fn extract_value(row: &PgRow, column: &PgColumn, index: usize) -> Value {
        // Check for NULL first
        match row.try_get_raw(index) {
            Ok(raw) if raw.is_null() => return Value::Null,
            Err(_) => return Value::Null,
            _ => {}
        }

        let type_name = column.type_info().name();
        Self::decode_by_type(row, index, type_name)
    }

    /// Decode a value based on its PostgreSQL type name.
    fn decode_by_type(row: &PgRow, index: usize, type_name: &str) -> Value {
        let decoded = match type_name {
            "BOOL" => row.try_get::<bool, _>(index).map(Value::Bool),

            // Integers
            "INT2" => row.try_get::<i16, _>(index).map(|v| Value::Int(v.into())),
            "INT4" => row.try_get::<i32, _>(index).map(|v| Value::Int(v.into())),
            "INT8" => row.try_get::<i64, _>(index).map(Value::Int),
            "OID" => row
                .try_get::<sqlx::postgres::types::Oid, _>(index)
                .map(|v| Value::Int(v.0.into())),

            // Floating point
            "FLOAT4" => row.try_get::<f32, _>(index).map(|v| Value::Float(v.into())),
            "FLOAT8" => row.try_get::<f64, _>(index).map(Value::Float),

            "NUMERIC" => row.try_get::<Decimal, _>(index).map(Value::Decimal),

            // Text types
            "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" | "CITEXT" => {
                row.try_get::<String, _>(index).map(Value::Text)
            }

            "BYTEA" => row.try_get::<Vec<u8>, _>(index).map(Value::Bytes),

            // Date/Time types
            "DATE" => row.try_get::<NaiveDate, _>(index).map(Value::Date),
            "TIME" => row.try_get::<NaiveTime, _>(index).map(Value::Time),
            "TIMESTAMP" => row.try_get::<NaiveDateTime, _>(index).map(Value::DateTime),
            "TIMESTAMPTZ" => row
                .try_get::<DateTime<Utc>, _>(index)
                .map(Value::DateTimeTz),

            "UUID" => row.try_get::<Uuid, _>(index).map(Value::Uuid),

            "JSON" | "JSONB" => row
                .try_get::<serde_json::Value, _>(index)
                .map(Value::Json),

            // Array types - handle common ones
            "INT2[]" => Self::decode_array::<i16>(row, index, |v| Value::Int(v.into())),
            "INT4[]" => Self::decode_array::<i32>(row, index, |v| Value::Int(v.into())),
            "INT8[]" => Self::decode_array::<i64>(row, index, Value::Int),
            "FLOAT8[]" => Self::decode_array::<f64>(row, index, Value::Float),
            "BOOL[]" => Self::decode_array::<bool>(row, index, Value::Bool),
            "TEXT[]" | "VARCHAR[]" | "NAME[]" => {
                Self::decode_array::<String>(row, index, Value::Text)
            }
            "UUID[]" => Self::decode_array::<Uuid>(row, index, Value::Uuid),

            _ => return Self::decode_as_string_fallback(row, index, type_name),
        };

        decoded.unwrap_or_else(|_| Self::decode_as_string_fallback(row, index, type_name))
    }

    fn decode_array<T>(
        row: &PgRow,
        index: usize,
        wrap: impl Fn(T) -> Value,
    ) -> Result<Value, sqlx::Error>
    where
        T: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
        Vec<T>: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
    {
        row.try_get::<Vec<T>, _>(index)
            .map(|arr| Value::Array(arr.into_iter().map(wrap).collect()))
    }

    /// Fallback for types without a dedicated mapping (enums, domains, ranges).
    fn decode_as_string_fallback(row: &PgRow, index: usize, type_name: &str) -> Value {
        if let Ok(s) = row.try_get_unchecked::<String, _>(index) {
            return Value::Other {
                type_name: type_name.to_string(),
                display: s,
            };
        }

        Value::Other {
            type_name: type_name.to_string(),
            display: "<unknown>".to_string(),
        }
    }

    /// Map the generic SSL mode to sqlx's PgSslMode.
    pub fn map_ssl_mode(mode: SslMode) -> PgSslMode {
        match mode {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Allow => PgSslMode::Allow,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require => PgSslMode::Require,
            SslMode::VerifyCa => PgSslMode::VerifyCa,
            SslMode::VerifyFull => PgSslMode::VerifyFull,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssl_mode_mapping() {
        assert!(matches!(
            PgValueConverter::map_ssl_mode(SslMode::Disable),
            PgSslMode::Disable
        ));
        assert!(matches!(
            PgValueConverter::map_ssl_mode(SslMode::Allow),
            PgSslMode::Allow
        ));
        assert!(matches!(
            PgValueConverter::map_ssl_mode(SslMode::Prefer),
            PgSslMode::Prefer
        ));
        assert!(matches!(
            PgValueConverter::map_ssl_mode(SslMode::Require),
            PgSslMode::Require
        ));
        assert!(matches!(
            PgValueConverter::map_ssl_mode(SslMode::VerifyFull),
            PgSslMode::VerifyFull
        ));
    }

    #[test]
    fn test_ssl_mode_from_stored_string() {
        assert!(matches!(
            PgValueConverter::map_ssl_mode(SslMode::parse("verify-ca")),
            PgSslMode::VerifyCa
        ));
        assert!(matches!(
            PgValueConverter::map_ssl_mode(SslMode::parse("")),
            PgSslMode::Prefer
        ));
    }
}
