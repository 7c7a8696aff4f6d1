//! PostgreSQL driver implementation.
//!
//! This module implements the `DatabaseDriver` trait for PostgreSQL using SQLx.
//!
//! User queries run on one dedicated session connection so that transactions
//! and `search_path` changes carry over between calls. Catalog queries and
//! cancellation go through a small side pool.

use async_lock::{Mutex as AsyncMutex, RwLock};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPoolOptions};
use sqlx::{ConnectOptions, Connection, Executor, PgPool, Statement};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::types::PgValueConverter;
use crate::error::{DriverError, DriverResult};
use crate::services::database::drivers::common::{
    backend_error, collect_page, column_info, connect_error, is_row_returning, query_failed,
};
use crate::services::database::params::{PlaceholderStyle, bind_params};
use crate::services::database::traits::{
    BoxedDriver, ColumnDef, ConnectionField, ConnectionTest, DatabaseDriver, DriverCapabilities,
    DriverParams, DriverType, FieldType, ForeignKeyInfo, IndexInfo, QueryErrorKind, QueryParams,
    QueryResult, Row, SslMode, TableInfo, Value,
};

const DEFAULT_SCHEMA: &str = "public";

/// The session connection plus the backend pid serving it.
struct Session {
    conn: PgConnection,
    pid: i32,
}

/// PostgreSQL driver.
pub struct PostgresDriver {
    pool: RwLock<Option<PgPool>>,
    session: AsyncMutex<Option<Session>>,
    /// Backend pid of the session, readable while the session is busy
    session_pid: Mutex<Option<i32>>,
    running: AtomicBool,
    schema: Mutex<String>,
}

impl std::fmt::Debug for PostgresDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresDriver")
            .field("schema", &self.current_schema())
            .field("pool", &"<PgPool>")
            .finish()
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the running flag when a query settles or its future is dropped.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl PostgresDriver {
    /// Create a new PostgreSQL driver.
    ///
    /// This does not connect immediately - call `connect()` to establish the connection.
    pub fn new() -> Self {
        Self {
            pool: RwLock::new(None),
            session: AsyncMutex::new(None),
            session_pid: Mutex::new(None),
            running: AtomicBool::new(false),
            schema: Mutex::new(DEFAULT_SCHEMA.to_string()),
        }
    }

    /// Create a boxed driver (for registry use).
    pub fn boxed() -> BoxedDriver {
        Box::new(Self::new())
    }

    pub fn capabilities() -> DriverCapabilities {
        DriverCapabilities {
            supports_schemas: true,
            supports_transactions: true,
            supports_explain: true,
            supports_cancel: true,
        }
    }

    pub fn connection_fields() -> Vec<ConnectionField> {
        vec![
            ConnectionField::new("host", "Host", FieldType::Text)
                .required()
                .with_default("localhost")
                .with_placeholder("localhost or IP address"),
            ConnectionField::new("port", "Port", FieldType::Number)
                .required()
                .with_default(DriverType::PostgreSQL.default_port()),
            ConnectionField::new("database", "Database", FieldType::Text)
                .required()
                .with_placeholder("Database name"),
            ConnectionField::new("username", "Username", FieldType::Text).required(),
            ConnectionField::new("password", "Password", FieldType::Password)
                .with_placeholder("Leave empty for no password"),
            ConnectionField::new("ssl_mode", "SSL Mode", FieldType::Dropdown)
                .with_default("prefer")
                .with_options(&["disable", "allow", "prefer", "require", "verify-full"])
                .with_tooltip("SSL connection mode"),
        ]
    }

    /// Build PgConnectOptions from generic params.
    pub(crate) fn build_connect_options(params: &DriverParams) -> DriverResult<PgConnectOptions> {
        let host = params.string_or("host", "localhost");
        let port = params
            .port("port")
            .unwrap_or(DriverType::PostgreSQL.default_port());
        let username = params
            .str("username")
            .ok_or_else(|| DriverError::InvalidConfig("username is required".into()))?;
        let ssl_mode = SslMode::parse(params.str("ssl_mode").unwrap_or("prefer"));

        let mut options = PgConnectOptions::new()
            .host(&host)
            .port(port)
            .username(username)
            .ssl_mode(PgValueConverter::map_ssl_mode(ssl_mode))
            .application_name("dbview");
        if let Some(database) = params.str("database") {
            options = options.database(database);
        }
        if let Some(password) = params.str("password") {
            options = options.password(password);
        }
        Ok(options)
    }

    /// Get a handle to the side pool.
    ///
    /// Returns `NotConnected` if `connect()` has not succeeded.
    pub(crate) async fn get_pool(&self) -> DriverResult<PgPool> {
        let guard = self.pool.read().await;
        guard
            .as_ref()
            .cloned()
            .ok_or(DriverError::NotConnected("PostgreSQL"))
    }

    /// Schema to introspect when the caller names none.
    pub(crate) fn schema_or_current(&self, schema: Option<&str>) -> String {
        schema
            .map(str::to_string)
            .or_else(|| self.current_schema())
            .unwrap_or_else(|| DEFAULT_SCHEMA.to_string())
    }

    async fn open_session(options: &PgConnectOptions) -> DriverResult<Session> {
        let mut conn = options.connect().await.map_err(connect_error)?;
        let pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
            .fetch_one(&mut conn)
            .await
            .map_err(connect_error)?;
        Ok(Session { conn, pid })
    }

    async fn run_on_session(
        conn: &mut PgConnection,
        sql: &str,
        values: Vec<Value>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<QueryResult, sqlx::Error> {
        let mut query = sqlx::query(sql);
        for value in values {
            query = PgValueConverter::bind(query, value);
        }

        if !is_row_returning(sql) {
            let result = query.execute(&mut *conn).await?;
            return Ok(QueryResult::affected(result.rows_affected()));
        }

        let (pg_rows, has_more) = collect_page(query.fetch(&mut *conn), limit, offset).await?;
        let columns = match pg_rows.first() {
            Some(first) => column_info(sqlx::Row::columns(first)),
            None => column_info((&mut *conn).prepare(sql).await?.columns()),
        };
        let rows: Vec<Row> = pg_rows.iter().map(PgValueConverter::convert_row).collect();

        Ok(QueryResult::new(columns, rows).with_has_more(has_more))
    }
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    fn driver_type(&self) -> DriverType {
        DriverType::PostgreSQL
    }

    fn capabilities(&self) -> DriverCapabilities {
        Self::capabilities()
    }

    async fn connect(&self, params: &DriverParams) -> DriverResult<()> {
        let options = Self::build_connect_options(params)?;

        let session = Self::open_session(&options).await?;
        let pool = PgPoolOptions::new()
            .max_connections(3)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(connect_error)?;

        tracing::info!(pid = session.pid, "Connected to PostgreSQL");

        if let Ok(mut pid) = self.session_pid.lock() {
            *pid = Some(session.pid);
        }
        if let Ok(mut schema) = self.schema.lock() {
            *schema = DEFAULT_SCHEMA.to_string();
        }
        if let Some(old) = self.session.lock().await.replace(session) {
            let _ = old.conn.close().await;
        }
        if let Some(old) = self.pool.write().await.replace(pool) {
            old.close().await;
        }
        Ok(())
    }

    async fn disconnect(&self) -> DriverResult<()> {
        if let Some(session) = self.session.lock().await.take() {
            if let Err(e) = session.conn.close().await {
                tracing::debug!(error = %e, "PostgreSQL session did not close cleanly");
            }
        }
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
        if let Ok(mut pid) = self.session_pid.lock() {
            *pid = None;
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.pool.read().await.is_some()
    }

    async fn test_connection(&self, params: &DriverParams) -> ConnectionTest {
        let options = match Self::build_connect_options(params) {
            Ok(options) => options,
            Err(e) => return ConnectionTest::failed(e.to_string()),
        };

        // Create a minimal pool for testing
        let pool = match PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
        {
            Ok(pool) => pool,
            Err(e) => return ConnectionTest::failed(connect_error(e).to_string()),
        };

        let version = sqlx::query_scalar::<_, String>("SELECT version()")
            .fetch_one(&pool)
            .await;
        pool.close().await;

        match version {
            Ok(version) => ConnectionTest::ok(version),
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
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or(DriverError::NotConnected("PostgreSQL"))?;

        let sql = query.trim();
        if sql.is_empty() {
            return Ok(QueryResult::failed(QueryErrorKind::Invalid, "Empty query"));
        }

        let (sql, values) = bind_params(sql, params, PlaceholderStyle::Dollar);
        let start = Instant::now();
        let outcome = {
            let _running = RunningGuard::enter(&self.running);
            Self::run_on_session(&mut session.conn, &sql, values, limit, offset).await
        };

        let result = outcome.unwrap_or_else(|e| {
            tracing::debug!(error = %e, "PostgreSQL query failed");
            query_failed(e)
        });
        Ok(result.with_elapsed(start.elapsed()))
    }

    async fn get_schemas(&self) -> DriverResult<Vec<String>> {
        self.list_schemas().await
    }

    async fn get_tables(&self, schema: Option<&str>) -> DriverResult<Vec<TableInfo>> {
        let schema = self.schema_or_current(schema);
        self.list_tables(&schema).await
    }

    async fn get_columns(&self, table: &str, schema: Option<&str>) -> DriverResult<Vec<ColumnDef>> {
        let schema = self.schema_or_current(schema);
        self.list_columns(&schema, table).await
    }

    async fn get_indexes(&self, table: &str, schema: Option<&str>) -> DriverResult<Vec<IndexInfo>> {
        let schema = self.schema_or_current(schema);
        self.list_indexes(&schema, table).await
    }

    async fn get_foreign_keys(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> DriverResult<Vec<ForeignKeyInfo>> {
        let schema = self.schema_or_current(schema);
        self.list_foreign_keys(&schema, table).await
    }

    async fn explain_query(&self, query: &str) -> DriverResult<String> {
        let result = self
            .execute(&format!("EXPLAIN ANALYZE {}", query), None, None, 0)
            .await?;
        if let Some(error) = result.error_message() {
            return Ok(format!("Error: {}", error));
        }
        let lines: Vec<String> = result
            .rows
            .iter()
            .filter_map(|row| row.get(0).map(|v| v.to_plain_string()))
            .collect();
        Ok(lines.join("\n"))
    }

    async fn cancel_query(&self) -> DriverResult<bool> {
        if !self.running.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let Some(pid) = self.session_pid.lock().ok().and_then(|pid| *pid) else {
            return Ok(false);
        };
        let pool = self.get_pool().await?;

        let cancelled: bool = sqlx::query_scalar("SELECT pg_cancel_backend($1)")
            .bind(pid)
            .fetch_one(&pool)
            .await
            .map_err(backend_error)?;
        tracing::debug!(pid, cancelled, "Requested PostgreSQL backend cancel");
        Ok(cancelled)
    }

    async fn set_schema(&self, schema: &str) -> DriverResult<bool> {
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or(DriverError::NotConnected("PostgreSQL"))?;

        let search_path = self.quote_identifier(schema);
        let applied = sqlx::query("SELECT set_config('search_path', $1, false)")
            .bind(&search_path)
            .execute(&mut session.conn)
            .await;

        match applied {
            Ok(_) => {
                if let Ok(mut current) = self.schema.lock() {
                    *current = schema.to_string();
                }
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(schema, error = %e, "Failed to set search_path");
                Ok(false)
            }
        }
    }

    fn current_schema(&self) -> Option<String> {
        self.schema.lock().ok().map(|s| s.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DriverParams {
        DriverParams::new()
            .with("host", "db.internal")
            .with("port", 6543)
            .with("database", "app")
            .with("username", "reader")
            .with("password", "secret")
            .with("ssl_mode", "disable")
    }

    #[test]
    fn test_build_connect_options() {
        let options = PostgresDriver::build_connect_options(&params()).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_username(), "reader");
        assert_eq!(options.get_database(), Some("app"));
    }

    #[test]
    fn test_build_connect_options_defaults_port() {
        let params = DriverParams::new().with("username", "u").with("port", 0);
        let options = PostgresDriver::build_connect_options(&params).unwrap();
        assert_eq!(options.get_port(), 5432);
        assert_eq!(options.get_host(), "localhost");
    }

    #[test]
    fn test_missing_username_is_invalid_config() {
        let err = PostgresDriver::build_connect_options(&DriverParams::new()).unwrap_err();
        assert!(matches!(err, DriverError::InvalidConfig(_)));
    }

    #[test]
    fn test_not_connected() {
        let driver = PostgresDriver::new();
        assert!(!smol::block_on(driver.is_connected()));
        let err = smol::block_on(driver.execute("SELECT 1", None, None, 0)).unwrap_err();
        assert!(matches!(err, DriverError::NotConnected("PostgreSQL")));
        assert!(matches!(
            smol::block_on(driver.set_schema("audit")),
            Err(DriverError::NotConnected(_))
        ));
    }

    #[test]
    fn test_cancel_when_idle_is_noop() {
        let driver = PostgresDriver::new();
        assert!(!smol::block_on(driver.cancel_query()).unwrap());
    }

    #[test]
    fn test_default_schema_and_capabilities() {
        let driver = PostgresDriver::new();
        assert_eq!(driver.current_schema().as_deref(), Some("public"));
        assert_eq!(driver.schema_or_current(Some("audit")), "audit");
        assert!(driver.capabilities().supports_cancel);
        assert_eq!(
            driver.quote_identifier("odd\"name"),
            "\"odd\"\"name\""
        );
    }

    #[test]
    fn test_connection_fields() {
        let fields = PostgresDriver::connection_fields();
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["host", "port", "database", "username", "password", "ssl_mode"]
        );
        assert_eq!(fields[5].options.len(), 4);
    }
}
