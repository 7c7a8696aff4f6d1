//! Core driver trait and query results.
//!
//! This module defines the `DatabaseDriver` trait every backend implements, the
//! `QueryResult` value it produces, and the capability flags callers check
//! before invoking optional operations.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use super::row::{ColumnInfo, Row, Value};
use super::schema::{ColumnDef, ForeignKeyInfo, IndexInfo, TableInfo};
use super::types::{DriverParams, DriverType, QueryParams};
use crate::error::DriverResult;

/// Message returned by `explain_query` on drivers without EXPLAIN support.
pub const EXPLAIN_NOT_SUPPORTED: &str = "EXPLAIN not supported for this database";

/// Error text carried by results of cancelled executions.
pub const QUERY_CANCELLED: &str = "Query cancelled";

/// Why a query produced no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// The input could not be interpreted (empty command, missing arguments)
    Invalid,
    /// The backend rejected or failed the query
    Backend,
    /// The execution was cancelled
    Cancelled,
    /// There was no live connection to run it on
    NotConnected,
}

/// A failed query: kind plus the backend's message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
}

impl QueryError {
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Result of executing one query
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    /// Column metadata
    pub columns: Vec<ColumnInfo>,
    /// Result rows, values in column order
    pub rows: Vec<Row>,
    /// Number of rows returned
    pub row_count: usize,
    /// Rows touched by INSERT/UPDATE/DELETE
    pub affected_rows: u64,
    /// Wall-clock execution time in milliseconds
    pub execution_time_ms: f64,
    /// Whether more rows were available past the requested limit
    pub has_more: bool,
    /// Set when the query failed
    pub error: Option<QueryError>,
    pub warnings: Vec<String>,
}

impl QueryResult {
    /// Create a row-returning result
    pub fn new(columns: Vec<ColumnInfo>, rows: Vec<Row>) -> Self {
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
            ..Default::default()
        }
    }

    /// Create a result for a statement that only reports affected rows
    pub fn affected(affected_rows: u64) -> Self {
        Self {
            affected_rows,
            ..Default::default()
        }
    }

    pub fn failed(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: Some(QueryError::new(kind, message)),
            ..Default::default()
        }
    }

    pub fn cancelled() -> Self {
        Self::failed(QueryErrorKind::Cancelled, QUERY_CANCELLED)
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.execution_time_ms = elapsed.as_secs_f64() * 1000.0;
        self
    }

    pub fn with_has_more(mut self, has_more: bool) -> Self {
        self.has_more = has_more;
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Skip `offset` rows and keep at most `limit`, for backends that cannot
    /// page server-side. Sets `has_more` when rows were cut.
    pub fn paginate(mut self, limit: Option<usize>, offset: usize) -> Self {
        if offset == 0 && limit.is_none_or(|limit| self.rows.len() <= limit) {
            return self;
        }
        let mut rows: Vec<Row> = self.rows.drain(..).skip(offset).collect();
        if let Some(limit) = limit {
            if rows.len() > limit {
                rows.truncate(limit);
                self.has_more = true;
            }
        }
        self.row_count = rows.len();
        self.rows = rows;
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    /// Rows as column name to value maps
    pub fn to_maps(&self) -> Vec<HashMap<&str, &Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .zip(row.iter())
                    .collect()
            })
            .collect()
    }
}

/// Optional features a driver declares; callers check these before invoking them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriverCapabilities {
    pub supports_schemas: bool,
    pub supports_transactions: bool,
    pub supports_explain: bool,
    pub supports_cancel: bool,
}

/// Outcome of `DatabaseDriver::test_connection`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTest {
    pub success: bool,
    /// Server version / summary on success, the cause on failure
    pub message: String,
}

impl ConnectionTest {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Core trait for all backend drivers.
///
/// All methods take `&self`: drivers keep their pool/connection behind interior
/// locks so a running `execute` and a `cancel_query` can overlap.
///
/// # Example
///
/// ```ignore
/// use dbview::services::database::traits::DatabaseDriver;
///
/// async fn example(driver: &dyn DatabaseDriver) -> anyhow::Result<()> {
///     let result = driver.execute("SELECT 1", None, None, 0).await?;
///     if !result.is_success() {
///         // inspect result.error
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    fn driver_type(&self) -> DriverType;

    fn capabilities(&self) -> DriverCapabilities;

    /// Establish the connection/pool from generic params.
    ///
    /// # Errors
    ///
    /// Returns a connection error (`FileNotFound`, `AuthRejected`,
    /// `Unreachable`, `InvalidConfig`) when the backend cannot be reached.
    async fn connect(&self, params: &DriverParams) -> DriverResult<()>;

    /// Close the connection and release resources. A no-op when not connected.
    async fn disconnect(&self) -> DriverResult<()>;

    async fn is_connected(&self) -> bool;

    /// Open a throwaway connection with `params` and report what was found.
    async fn test_connection(&self, params: &DriverParams) -> ConnectionTest;

    /// Execute a query.
    ///
    /// Query failures are returned inside `QueryResult::error`. Only a missing
    /// connection produces `Err`.
    async fn execute(
        &self,
        query: &str,
        params: Option<&QueryParams>,
        limit: Option<usize>,
        offset: usize,
    ) -> DriverResult<QueryResult>;

    async fn get_schemas(&self) -> DriverResult<Vec<String>>;

    async fn get_tables(&self, schema: Option<&str>) -> DriverResult<Vec<TableInfo>>;

    async fn get_columns(&self, table: &str, schema: Option<&str>) -> DriverResult<Vec<ColumnDef>>;

    async fn get_indexes(&self, _table: &str, _schema: Option<&str>) -> DriverResult<Vec<IndexInfo>> {
        Ok(Vec::new())
    }

    async fn get_foreign_keys(
        &self,
        _table: &str,
        _schema: Option<&str>,
    ) -> DriverResult<Vec<ForeignKeyInfo>> {
        Ok(Vec::new())
    }

    /// First `limit` rows of a table.
    async fn get_table_preview(
        &self,
        table: &str,
        schema: Option<&str>,
        limit: usize,
    ) -> DriverResult<QueryResult> {
        let target = match schema {
            Some(schema) if self.capabilities().supports_schemas => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(table)
            ),
            _ => self.quote_identifier(table),
        };
        let sql = format!("SELECT * FROM {} LIMIT {}", target, limit);
        self.execute(&sql, None, None, 0).await
    }

    /// Only called when `supports_explain` is set.
    async fn explain_query(&self, _query: &str) -> DriverResult<String> {
        Ok(EXPLAIN_NOT_SUPPORTED.to_string())
    }

    /// Ask the backend to abort the running query. Only called when
    /// `supports_cancel` is set; returns whether the backend acknowledged.
    async fn cancel_query(&self) -> DriverResult<bool> {
        Ok(false)
    }

    /// Switch the active schema / database for subsequent queries.
    async fn set_schema(&self, schema: &str) -> DriverResult<bool>;

    fn current_schema(&self) -> Option<String>;

    /// Quote an identifier for generated SQL
    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    /// Format a value for display in a result grid
    fn format_value(&self, value: &Value) -> String {
        value.to_display_string()
    }
}

/// A boxed driver trait object.
pub type BoxedDriver = Box<dyn DatabaseDriver>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_result_creation() {
        let result = QueryResult::new(
            vec![ColumnInfo::new("id", "INTEGER")],
            vec![Row::new(vec![Value::Int(1)]), Row::new(vec![Value::Int(2)])],
        )
        .with_elapsed(Duration::from_millis(12));

        assert_eq!(result.row_count, 2);
        assert_eq!(result.columns.len(), 1);
        assert!((result.execution_time_ms - 12.0).abs() < f64::EPSILON);
        assert!(result.is_success());
    }

    #[test]
    fn test_is_success_tracks_error() {
        let failed = QueryResult::failed(QueryErrorKind::Backend, "syntax error");
        assert!(!failed.is_success());
        assert_eq!(failed.error_message(), Some("syntax error"));

        let affected = QueryResult::affected(5);
        assert!(affected.is_success());
        assert_eq!(affected.affected_rows, 5);
        assert_eq!(affected.row_count, 0);
    }

    #[test]
    fn test_cancelled_result() {
        let result = QueryResult::cancelled();
        assert_eq!(result.error_message(), Some(QUERY_CANCELLED));
        assert_eq!(result.error.map(|e| e.kind), Some(QueryErrorKind::Cancelled));
    }

    #[test]
    fn test_paginate() {
        let result = QueryResult::new(
            vec![ColumnInfo::new("value", "str")],
            (0..5).map(|i| Row::new(vec![Value::Int(i)])).collect(),
        );

        let page = result.clone().paginate(Some(2), 1);
        assert_eq!(page.row_count, 2);
        assert_eq!(page.rows[0].get(0), Some(&Value::Int(1)));
        assert!(page.has_more);

        let tail = result.clone().paginate(Some(10), 3);
        assert_eq!(tail.row_count, 2);
        assert!(!tail.has_more);

        let all = result.paginate(None, 0);
        assert_eq!(all.row_count, 5);
        assert!(!all.has_more);
    }

    #[test]
    fn test_to_maps_keys_by_column() {
        let result = QueryResult::new(
            vec![ColumnInfo::new("id", "int"), ColumnInfo::new("name", "text")],
            vec![Row::new(vec![Value::Int(7), Value::from("ada")])],
        );
        let maps = result.to_maps();
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0]["name"], &Value::from("ada"));
        assert_eq!(maps[0]["id"], &Value::Int(7));
    }
}
