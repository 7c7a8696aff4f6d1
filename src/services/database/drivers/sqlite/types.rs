//! SQLite type conversion utilities.
//!
//! This module handles conversion between SQLite values (from SQLx)
//! and the generic `Value` type used across all drivers.
//!
//! SQLite uses dynamic typing with type affinity:
//! - INTEGER: 64-bit signed integer
//! - REAL: 64-bit floating point
//! - TEXT: UTF-8 string
//! - BLOB: Binary data
//! - NULL: Null value

use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row, Sqlite, TypeInfo, ValueRef};

use crate::services::database::traits::{Row as ResultRow, Value};

/// Converter between SQLite values and the unified `Value` type.
pub struct SqliteValueConverter;

impl SqliteValueConverter {
    /// Convert a SQLite row to a result row.
    pub fn convert_row(sqlite_row: &SqliteRow) -> ResultRow {
        let values = sqlite_row
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| Self::extract_value(sqlite_row, idx, col.type_info().name()))
            .collect();

        ResultRow::new(values)
    }

    /// Bind a unified value as the next positional parameter.
    pub fn bind<'q>(
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
        value: Value,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(v),
            Value::Int(v) => query.bind(v),
            Value::UInt(v) => match i64::try_from(v) {
                Ok(v) => query.bind(v),
                Err(_) => query.bind(v.to_string()),
            },
            Value::Float(v) => query.bind(v),
            Value::Text(v) => query.bind(v),
            Value::Bytes(v) => query.bind(v),
            Value::Date(v) => query.bind(v),
            Value::Time(v) => query.bind(v),
            Value::DateTime(v) => query.bind(v),
            Value::DateTimeTz(v) => query.bind(v),
            other => query.bind(other.to_plain_string()),
        }
    }

    /// Extract a value from a SQLite row at the given column index.
    ///
    /// The declared type drives the decode; SQLite's storage class wins when the
    /// declared type and the stored value disagree.
    fn extract_value(row: &SqliteRow, index: usize, declared: &str) -> Value {
        let storage_class = match row.try_get_raw(index) {
            Ok(raw) if raw.is_null() => return Value::Null,
            Ok(raw) => raw.type_info().name().to_uppercase(),
            Err(_) => return Value::Null,
        };

        let declared = declared.to_uppercase();
        match declared.as_str() {
            "BOOLEAN" | "BOOL" => row
                .try_get::<bool, _>(index)
                .map(Value::Bool)
                .unwrap_or_else(|_| Self::decode_storage(row, index, &storage_class)),
            "DATE" => Self::decode_date(row, index)
                .unwrap_or_else(|| Self::decode_storage(row, index, &storage_class)),
            "DATETIME" | "TIMESTAMP" => Self::decode_datetime(row, index)
                .unwrap_or_else(|| Self::decode_storage(row, index, &storage_class)),
            "NUMERIC" | "DECIMAL" => Self::decode_numeric(row, index)
                .unwrap_or_else(|| Self::decode_storage(row, index, &storage_class)),
            _ => Self::decode_storage(row, index, &storage_class),
        }
    }

    /// Decode by the value's actual storage class.
    fn decode_storage(row: &SqliteRow, index: usize, storage_class: &str) -> Value {
        let decoded = match storage_class {
            "INTEGER" => row.try_get::<i64, _>(index).map(Value::Int),
            "REAL" => row.try_get::<f64, _>(index).map(Value::Float),
            "BLOB" => row.try_get::<Vec<u8>, _>(index).map(Value::Bytes),
            _ => row.try_get::<String, _>(index).map(Value::Text),
        };

        decoded.unwrap_or_else(|_| {
            // Fall back across storage classes for expression columns
            row.try_get::<String, _>(index)
                .map(Value::Text)
                .or_else(|_| row.try_get::<Vec<u8>, _>(index).map(Value::Bytes))
                .unwrap_or(Value::Other {
                    type_name: storage_class.to_string(),
                    display: "<unknown>".to_string(),
                })
        })
    }

    /// DATE stored as ISO text.
    fn decode_date(row: &SqliteRow, index: usize) -> Option<Value> {
        let s = row.try_get::<String, _>(index).ok()?;
        chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .ok()
            .map(Value::Date)
    }

    /// DATETIME stored as ISO text, with or without the `T` separator.
    fn decode_datetime(row: &SqliteRow, index: usize) -> Option<Value> {
        let s = row.try_get::<String, _>(index).ok()?;
        ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(&s, fmt).ok())
            .map(Value::DateTime)
    }

    /// NUMERIC/DECIMAL: keep textual precision when the value is stored as text.
    fn decode_numeric(row: &SqliteRow, index: usize) -> Option<Value> {
        let s = row.try_get::<String, _>(index).ok()?;
        s.parse::<rust_decimal::Decimal>().ok().map(Value::Decimal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqliteConnectOptions;
    use sqlx::{ConnectOptions, Executor};
    use std::str::FromStr;

    fn fetch_one(sql: &str) -> ResultRow {
        smol::block_on(async {
            let mut conn = SqliteConnectOptions::from_str("sqlite::memory:")
                .unwrap()
                .connect()
                .await
                .unwrap();
            let row = conn.fetch_one(sql).await.unwrap();
            SqliteValueConverter::convert_row(&row)
        })
    }

    #[test]
    fn test_storage_class_decoding() {
        let row = fetch_one("SELECT 1, 2.5, 'text', x'DEAD', NULL");
        assert_eq!(row.get(0), Some(&Value::Int(1)));
        assert_eq!(row.get(1), Some(&Value::Float(2.5)));
        assert_eq!(row.get(2), Some(&Value::Text("text".to_string())));
        assert_eq!(row.get(3), Some(&Value::Bytes(vec![0xDE, 0xAD])));
        assert_eq!(row.get(4), Some(&Value::Null));
    }

    #[test]
    fn test_bind_round_trip() {
        let value = smol::block_on(async {
            let mut conn = SqliteConnectOptions::from_str("sqlite::memory:")
                .unwrap()
                .connect()
                .await
                .unwrap();
            let query = SqliteValueConverter::bind(sqlx::query("SELECT ?"), Value::from("hi"));
            let row = query.fetch_one(&mut conn).await.unwrap();
            SqliteValueConverter::convert_row(&row)
        });
        assert_eq!(value.get(0), Some(&Value::Text("hi".to_string())));
    }
}
