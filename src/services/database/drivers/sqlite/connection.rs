//! SQLite driver implementation.
//!
//! This module implements the `DatabaseDriver` trait for SQLite files
//! using SQLx's SqlitePool.

use async_lock::RwLock;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Executor, SqlitePool, Statement};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::types::SqliteValueConverter;
use crate::error::{DriverError, DriverResult};
use crate::services::database::drivers::common::{
    collect_page, column_info, connect_error, is_row_returning, query_failed,
};
use crate::services::database::params::{PlaceholderStyle, bind_params};
use crate::services::database::traits::{
    BoxedDriver, ColumnDef, ConnectionField, ConnectionTest, DatabaseDriver, DriverCapabilities,
    DriverParams, DriverType, FieldType, ForeignKeyInfo, IndexInfo, QueryErrorKind, QueryParams,
    QueryResult, Row, TableInfo,
};

/// SQLite driver.
///
/// Wraps a single-connection SqlitePool opened on an existing database file.
pub struct SqliteDriver {
    pool: RwLock<Option<SqlitePool>>,
    path: Mutex<Option<PathBuf>>,
}

impl std::fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDriver")
            .field("path", &self.path.lock().ok().and_then(|p| p.clone()))
            .field("pool", &"<SqlitePool>")
            .finish()
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SqliteDriver {
    /// Create a disconnected driver. Call `connect()` to open a file.
    pub fn new() -> Self {
        Self {
            pool: RwLock::new(None),
            path: Mutex::new(None),
        }
    }

    /// Create a boxed driver (for registry use).
    pub fn boxed() -> BoxedDriver {
        Box::new(Self::new())
    }

    pub fn capabilities() -> DriverCapabilities {
        DriverCapabilities {
            supports_schemas: false,
            supports_transactions: true,
            supports_explain: true,
            supports_cancel: false,
        }
    }

    pub fn connection_fields() -> Vec<ConnectionField> {
        vec![
            ConnectionField::new("database", "Database File", FieldType::File)
                .required()
                .with_placeholder("/path/to/database.db")
                .with_tooltip("Path to the SQLite database file"),
            ConnectionField::new("read_only", "Read Only", FieldType::Checkbox)
                .with_default(false)
                .with_tooltip("Open the database in read-only mode"),
        ]
    }

    /// Resolve the database path from params, expanding a leading `~`.
    fn resolve_path(params: &DriverParams) -> DriverResult<PathBuf> {
        let raw = params
            .str("database")
            .ok_or_else(|| DriverError::InvalidConfig("database file path is required".into()))?;

        match raw.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|home| home.join(rest))
                .ok_or_else(|| DriverError::InvalidConfig("could not resolve home directory".into())),
            None => Ok(PathBuf::from(raw)),
        }
    }

    /// Check the path points at an existing regular file.
    async fn check_file(path: &Path) -> DriverResult<std::fs::Metadata> {
        let metadata = async_fs::metadata(path)
            .await
            .map_err(|_| DriverError::FileNotFound(path.to_path_buf()))?;
        if !metadata.is_file() {
            return Err(DriverError::InvalidConfig(format!(
                "Not a file: {}",
                path.display()
            )));
        }
        Ok(metadata)
    }

    /// Build SqliteConnectOptions for an existing file.
    fn build_connect_options(path: &Path, read_only: bool) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false)
            .read_only(read_only)
            .foreign_keys(true)
    }

    async fn open_pool(path: &Path, read_only: bool) -> DriverResult<SqlitePool> {
        SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(Self::build_connect_options(path, read_only))
            .await
            .map_err(connect_error)
    }

    /// Get a handle to the connection pool.
    ///
    /// Returns `NotConnected` if `connect()` has not succeeded.
    pub(crate) async fn get_pool(&self) -> DriverResult<SqlitePool> {
        let guard = self.pool.read().await;
        guard
            .as_ref()
            .cloned()
            .ok_or(DriverError::NotConnected("SQLite"))
    }

    /// Run a row-returning statement.
    async fn execute_select(
        pool: &SqlitePool,
        sql: &str,
        values: Vec<crate::services::database::traits::Value>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<QueryResult, sqlx::Error> {
        let mut query = sqlx::query(sql);
        for value in values {
            query = SqliteValueConverter::bind(query, value);
        }

        let (sqlite_rows, has_more) = collect_page(query.fetch(pool), limit, offset).await?;

        let columns = match sqlite_rows.first() {
            Some(first) => column_info(sqlx::Row::columns(first)),
            None => column_info(pool.prepare(sql).await?.columns()),
        };
        let rows: Vec<Row> = sqlite_rows
            .iter()
            .map(SqliteValueConverter::convert_row)
            .collect();

        Ok(QueryResult::new(columns, rows).with_has_more(has_more))
    }

    /// Run a statement that reports affected rows.
    async fn execute_modification(
        pool: &SqlitePool,
        sql: &str,
        values: Vec<crate::services::database::traits::Value>,
    ) -> Result<QueryResult, sqlx::Error> {
        let mut query = sqlx::query(sql);
        for value in values {
            query = SqliteValueConverter::bind(query, value);
        }
        let result = query.execute(pool).await?;
        Ok(QueryResult::affected(result.rows_affected()))
    }
}

#[async_trait]
impl DatabaseDriver for SqliteDriver {
    fn driver_type(&self) -> DriverType {
        DriverType::Sqlite
    }

    fn capabilities(&self) -> DriverCapabilities {
        Self::capabilities()
    }

    async fn connect(&self, params: &DriverParams) -> DriverResult<()> {
        let path = Self::resolve_path(params)?;
        Self::check_file(&path).await?;

        let read_only = params.bool("read_only");
        let pool = Self::open_pool(&path, read_only).await?;

        tracing::info!(path = %path.display(), read_only, "Opened SQLite database");

        let mut guard = self.pool.write().await;
        if let Some(old) = guard.replace(pool) {
            old.close().await;
        }
        if let Ok(mut current) = self.path.lock() {
            *current = Some(path);
        }
        Ok(())
    }

    async fn disconnect(&self) -> DriverResult<()> {
        let mut guard = self.pool.write().await;
        if let Some(pool) = guard.take() {
            pool.close().await;
            tracing::debug!("Closed SQLite database");
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.pool.read().await.is_some()
    }

    async fn test_connection(&self, params: &DriverParams) -> ConnectionTest {
        let path = match Self::resolve_path(params) {
            Ok(path) => path,
            Err(e) => return ConnectionTest::failed(e.to_string()),
        };
        let metadata = match async_fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(_) => return ConnectionTest::failed(format!("File not found: {}", path.display())),
        };
        if !metadata.is_file() {
            return ConnectionTest::failed(format!("Not a file: {}", path.display()));
        }

        let pool = match Self::open_pool(&path, true).await {
            Ok(pool) => pool,
            Err(e) => return ConnectionTest::failed(e.to_string()),
        };

        let inspect = async {
            let version: String = sqlx::query_scalar("SELECT sqlite_version()")
                .fetch_one(&pool)
                .await?;
            let tables: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
                    .fetch_one(&pool)
                    .await?;
            Ok::<_, sqlx::Error>((version, tables))
        };
        let outcome = inspect.await;
        pool.close().await;

        match outcome {
            Ok((version, tables)) => {
                let size_mb = metadata.len() as f64 / (1024.0 * 1024.0);
                ConnectionTest::ok(format!(
                    "SQLite {}\n{} tables, {:.1} MB",
                    version, tables, size_mb
                ))
            }
            Err(e) => ConnectionTest::failed(e.to_string()),
        }
    }

    async fn execute(
        &self,
        query: &str,
        params: Option<&QueryParams>,
        limit: Option<usize>,
        offset: usize,
    ) -> DriverResult<QueryResult> {
        let pool = self.get_pool().await?;

        let sql = query.trim();
        if sql.is_empty() {
            return Ok(QueryResult::failed(QueryErrorKind::Invalid, "Empty query"));
        }

        let (sql, values) = bind_params(sql, params, PlaceholderStyle::Question);
        let start = Instant::now();
        let outcome = if is_row_returning(&sql) {
            Self::execute_select(&pool, &sql, values, limit, offset).await
        } else {
            Self::execute_modification(&pool, &sql, values).await
        };

        let result = outcome.unwrap_or_else(|e| {
            tracing::debug!(error = %e, "SQLite query failed");
            query_failed(e)
        });
        Ok(result.with_elapsed(start.elapsed()))
    }

    async fn get_schemas(&self) -> DriverResult<Vec<String>> {
        Ok(vec!["main".to_string()])
    }

    async fn get_tables(&self, _schema: Option<&str>) -> DriverResult<Vec<TableInfo>> {
        self.list_tables().await
    }

    async fn get_columns(&self, table: &str, _schema: Option<&str>) -> DriverResult<Vec<ColumnDef>> {
        self.list_columns(table).await
    }

    async fn get_indexes(&self, table: &str, _schema: Option<&str>) -> DriverResult<Vec<IndexInfo>> {
        self.list_indexes(table).await
    }

    async fn get_foreign_keys(
        &self,
        table: &str,
        _schema: Option<&str>,
    ) -> DriverResult<Vec<ForeignKeyInfo>> {
        self.list_foreign_keys(table).await
    }

    async fn explain_query(&self, query: &str) -> DriverResult<String> {
        let result = self
            .execute(&format!("EXPLAIN QUERY PLAN {}", query), None, None, 0)
            .await?;
        if let Some(error) = result.error_message() {
            return Ok(format!("Error: {}", error));
        }

        // EXPLAIN QUERY PLAN returns: id, parent, notused, detail
        let lines: Vec<String> = result
            .rows
            .iter()
            .filter_map(|row| row.get(3).map(|v| v.to_plain_string()))
            .collect();
        Ok(lines.join("\n"))
    }

    async fn set_schema(&self, schema: &str) -> DriverResult<bool> {
        Ok(schema == "main")
    }

    fn current_schema(&self) -> Option<String> {
        Some("main".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::traits::Value;

    fn empty_db() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.db");
        std::fs::File::create(&path).unwrap();
        (dir, path)
    }

    fn params_for(path: &Path) -> DriverParams {
        DriverParams::new().with("database", path.display().to_string())
    }

    #[test]
    fn test_capabilities() {
        let driver = SqliteDriver::new();
        assert_eq!(driver.driver_type(), DriverType::Sqlite);
        assert!(!driver.capabilities().supports_schemas);
        assert!(driver.capabilities().supports_explain);
        assert!(!driver.capabilities().supports_cancel);
    }

    #[test]
    fn test_connect_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");
        let driver = SqliteDriver::new();

        let err = smol::block_on(driver.connect(&params_for(&path))).unwrap_err();
        assert!(matches!(err, DriverError::FileNotFound(p) if p == path));
        assert!(!smol::block_on(driver.is_connected()));
    }

    #[test]
    fn test_connect_requires_path() {
        let driver = SqliteDriver::new();
        let err = smol::block_on(driver.connect(&DriverParams::new())).unwrap_err();
        assert!(matches!(err, DriverError::InvalidConfig(_)));
    }

    #[test]
    fn test_execute_without_connection() {
        let driver = SqliteDriver::new();
        let err = smol::block_on(driver.execute("SELECT 1", None, None, 0)).unwrap_err();
        assert!(matches!(err, DriverError::NotConnected(_)));
    }

    #[test]
    fn test_empty_database_introspection() {
        let (_dir, path) = empty_db();
        let driver = SqliteDriver::new();

        smol::block_on(async {
            driver.connect(&params_for(&path)).await.unwrap();
            assert!(driver.get_tables(None).await.unwrap().is_empty());
            assert_eq!(driver.get_schemas().await.unwrap(), vec!["main".to_string()]);
            driver.disconnect().await.unwrap();
        });
    }

    #[test]
    fn test_execute_round_trip() {
        let (_dir, path) = empty_db();
        let driver = SqliteDriver::new();

        smol::block_on(async {
            driver.connect(&params_for(&path)).await.unwrap();

            let created = driver
                .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", None, None, 0)
                .await
                .unwrap();
            assert!(created.is_success());

            let params = QueryParams::Named(vec![("name".to_string(), Value::from("ada"))]);
            let inserted = driver
                .execute("INSERT INTO users (name) VALUES (:name)", Some(&params), None, 0)
                .await
                .unwrap();
            assert_eq!(inserted.affected_rows, 1);

            let selected = driver
                .execute("SELECT id, name FROM users", None, None, 0)
                .await
                .unwrap();
            assert_eq!(selected.row_count, 1);
            assert_eq!(selected.columns[1].name, "name");
            assert_eq!(selected.rows[0].get(1), Some(&Value::from("ada")));
        });
    }

    #[test]
    fn test_empty_select_keeps_columns() {
        let (_dir, path) = empty_db();
        let driver = SqliteDriver::new();

        smol::block_on(async {
            driver.connect(&params_for(&path)).await.unwrap();
            driver
                .execute("CREATE TABLE t (a INTEGER, b TEXT)", None, None, 0)
                .await
                .unwrap();
            let result = driver.execute("SELECT a, b FROM t", None, None, 0).await.unwrap();
            assert!(result.is_success());
            assert_eq!(result.row_count, 0);
            assert_eq!(result.columns.len(), 2);
        });
    }

    #[test]
    fn test_query_error_is_result_not_fault() {
        let (_dir, path) = empty_db();
        let driver = SqliteDriver::new();

        smol::block_on(async {
            driver.connect(&params_for(&path)).await.unwrap();
            let result = driver.execute("SELECT * FROM nope", None, None, 0).await.unwrap();
            assert!(!result.is_success());
            assert!(result.error_message().unwrap().contains("nope"));

            let empty = driver.execute("   ", None, None, 0).await.unwrap();
            assert_eq!(empty.error_message(), Some("Empty query"));
        });
    }

    #[test]
    fn test_commented_select_returns_rows() {
        let (_dir, path) = empty_db();
        let driver = SqliteDriver::new();

        smol::block_on(async {
            driver.connect(&params_for(&path)).await.unwrap();
            for sql in ["-- note\nSELECT 1 AS x", "/* c */ SELECT 1 AS x"] {
                let result = driver.execute(sql, None, None, 0).await.unwrap();
                assert!(result.is_success(), "{}", sql);
                assert_eq!(result.row_count, 1, "{}", sql);
                assert_eq!(result.columns[0].name, "x");
                assert_eq!(result.rows[0].get(0), Some(&Value::Int(1)));
            }
        });
    }

    #[test]
    fn test_insert_returning_on_new_line() {
        let (_dir, path) = empty_db();
        let driver = SqliteDriver::new();

        smol::block_on(async {
            driver.connect(&params_for(&path)).await.unwrap();
            driver
                .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, a TEXT)", None, None, 0)
                .await
                .unwrap();
            let result = driver
                .execute("INSERT INTO t (a) VALUES ('x')\nRETURNING id", None, None, 0)
                .await
                .unwrap();
            assert!(result.is_success());
            assert_eq!(result.row_count, 1);
            assert_eq!(result.columns[0].name, "id");
            assert_eq!(result.rows[0].get(0), Some(&Value::Int(1)));
        });
    }

    #[test]
    fn test_limit_and_offset() {
        let (_dir, path) = empty_db();
        let driver = SqliteDriver::new();

        smol::block_on(async {
            driver.connect(&params_for(&path)).await.unwrap();
            let result = driver
                .execute(
                    "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 10) SELECT x FROM n",
                    None,
                    Some(3),
                    2,
                )
                .await
                .unwrap();
            assert_eq!(result.row_count, 3);
            assert!(result.has_more);
            assert_eq!(result.rows[0].get(0), Some(&Value::Int(3)));
        });
    }

    #[test]
    fn test_test_connection_reports() {
        let (_dir, path) = empty_db();
        let driver = SqliteDriver::new();

        let ok = smol::block_on(driver.test_connection(&params_for(&path)));
        assert!(ok.success, "{}", ok.message);
        assert!(ok.message.starts_with("SQLite "));
        assert!(ok.message.contains("0 tables"));

        let missing = path.with_file_name("nope.db");
        let failed = smol::block_on(driver.test_connection(&params_for(&missing)));
        assert!(!failed.success);
        assert!(failed.message.starts_with("File not found: "));
    }
}
