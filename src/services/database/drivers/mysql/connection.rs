//! MySQL / MariaDB driver implementation.
//!
//! This module implements the `DatabaseDriver` trait for MySQL using SQLx.
//! As with PostgreSQL, user queries run on a dedicated session connection and
//! `KILL QUERY` is issued from the side pool.

use async_lock::{Mutex as AsyncMutex, RwLock};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlPoolOptions};
use sqlx::{ConnectOptions, Connection, Executor, MySqlPool, Statement};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::types::MySqlValueConverter;
use crate::error::{DriverError, DriverResult};
use crate::services::database::drivers::common::{
    backend_error, collect_page, column_info, connect_error, format_plan_table, is_row_returning,
    query_failed,
};
use crate::services::database::params::bind_pyformat;
use crate::services::database::traits::{
    BoxedDriver, ColumnDef, ConnectionField, ConnectionTest, DatabaseDriver, DriverCapabilities,
    DriverParams, DriverType, FieldType, ForeignKeyInfo, IndexInfo, QueryErrorKind, QueryParams,
    QueryResult, Row, SslMode, TableInfo, Value,
};

/// Schemas hidden from `get_schemas`
pub(crate) const SYSTEM_DATABASES: &[&str] =
    &["information_schema", "mysql", "performance_schema", "sys"];

struct Session {
    conn: MySqlConnection,
    connection_id: u64,
}

/// MySQL / MariaDB driver.
pub struct MySqlDriver {
    pool: RwLock<Option<MySqlPool>>,
    session: AsyncMutex<Option<Session>>,
    connection_id: Mutex<Option<u64>>,
    running: AtomicBool,
    database: Mutex<Option<String>>,
}

impl std::fmt::Debug for MySqlDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlDriver")
            .field("database", &self.current_schema())
            .field("pool", &"<MySqlPool>")
            .finish()
    }
}

impl Default for MySqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

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

/// Backtick-quote a MySQL identifier
pub(crate) fn quote_backtick(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

impl MySqlDriver {
    /// Create a new MySQL driver.
    ///
    /// This does not connect immediately - call `connect()` to establish the connection.
    pub fn new() -> Self {
        Self {
            pool: RwLock::new(None),
            session: AsyncMutex::new(None),
            connection_id: Mutex::new(None),
            running: AtomicBool::new(false),
            database: Mutex::new(None),
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
                .with_default(DriverType::MySQL.default_port()),
            ConnectionField::new("database", "Database", FieldType::Text)
                .required()
                .with_placeholder("Database name"),
            ConnectionField::new("username", "Username", FieldType::Text)
                .required()
                .with_default("root"),
            ConnectionField::new("password", "Password", FieldType::Password)
                .with_placeholder("Leave empty for no password"),
            ConnectionField::new("ssl", "Use SSL", FieldType::Checkbox)
                .with_default(false)
                .with_tooltip("Enable SSL/TLS encrypted connection"),
        ]
    }

    /// Build MySqlConnectOptions from generic params.
    ///
    /// The `ssl` checkbox forces TLS; otherwise a stored `ssl_mode` applies.
    pub(crate) fn build_connect_options(params: &DriverParams) -> MySqlConnectOptions {
        let ssl_mode = if params.bool("ssl") {
            SslMode::Require
        } else {
            SslMode::parse(params.str("ssl_mode").unwrap_or("prefer"))
        };

        let mut options = MySqlConnectOptions::new()
            .host(&params.string_or("host", "localhost"))
            .port(params.port("port").unwrap_or(DriverType::MySQL.default_port()))
            .username(&params.string_or("username", "root"))
            .ssl_mode(MySqlValueConverter::map_ssl_mode(ssl_mode));
        if let Some(database) = params.str("database") {
            options = options.database(database);
        }
        if let Some(password) = params.str("password") {
            options = options.password(password);
        }
        options
    }

    /// Get a handle to the side pool.
    ///
    /// Returns `NotConnected` if `connect()` has not succeeded.
    pub(crate) async fn get_pool(&self) -> DriverResult<MySqlPool> {
        let guard = self.pool.read().await;
        guard
            .as_ref()
            .cloned()
            .ok_or(DriverError::NotConnected("MySQL"))
    }

    /// Database to introspect when the caller names none.
    pub(crate) fn schema_or_current(&self, schema: Option<&str>) -> Option<String> {
        schema.map(str::to_string).or_else(|| self.current_schema())
    }

    async fn open_session(options: &MySqlConnectOptions) -> DriverResult<Session> {
        let mut conn = options.connect().await.map_err(connect_error)?;
        let connection_id: u64 = sqlx::query_scalar("SELECT CONNECTION_ID()")
            .fetch_one(&mut conn)
            .await
            .map_err(connect_error)?;
        Ok(Session {
            conn,
            connection_id,
        })
    }

    async fn run_on_session(
        conn: &mut MySqlConnection,
        sql: &str,
        values: Vec<Value>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<QueryResult, sqlx::Error> {
        let mut query = sqlx::query(sql);
        for value in values {
            query = MySqlValueConverter::bind(query, value);
        }

        if !is_row_returning(sql) {
            let result = query.execute(&mut *conn).await?;
            return Ok(QueryResult::affected(result.rows_affected()));
        }

        let (mysql_rows, has_more) = collect_page(query.fetch(&mut *conn), limit, offset).await?;
        let columns = match mysql_rows.first() {
            Some(first) => column_info(sqlx::Row::columns(first)),
            // Some statements cannot be prepared; their empty results carry no columns
            None => (&mut *conn)
                .prepare(sql)
                .await
                .map(|statement| column_info(statement.columns()))
                .unwrap_or_default(),
        };
        let rows: Vec<Row> = mysql_rows
            .iter()
            .map(MySqlValueConverter::convert_row)
            .collect();

        Ok(QueryResult::new(columns, rows).with_has_more(has_more))
    }
}

#[async_trait]
impl DatabaseDriver for MySqlDriver {
    fn driver_type(&self) -> DriverType {
        DriverType::MySQL
    }

    fn capabilities(&self) -> DriverCapabilities {
        Self::capabilities()
    }

    async fn connect(&self, params: &DriverParams) -> DriverResult<()> {
        let options = Self::build_connect_options(params);

        let session = Self::open_session(&options).await?;
        let pool = MySqlPoolOptions::new()
            .max_connections(3)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(connect_error)?;

        tracing::info!(connection_id = session.connection_id, "Connected to MySQL");

        if let Ok(mut id) = self.connection_id.lock() {
            *id = Some(session.connection_id);
        }
        if let Ok(mut database) = self.database.lock() {
            *database = params.str("database").map(str::to_string);
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
                tracing::debug!(error = %e, "MySQL session did not close cleanly");
            }
        }
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
        if let Ok(mut id) = self.connection_id.lock() {
            *id = None;
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.pool.read().await.is_some()
    }

    async fn test_connection(&self, params: &DriverParams) -> ConnectionTest {
        let options = Self::build_connect_options(params);

        let pool = match MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
        {
            Ok(pool) => pool,
            Err(e) => return ConnectionTest::failed(connect_error(e).to_string()),
        };

        let version = sqlx::query_scalar::<_, String>("SELECT VERSION()")
            .fetch_optional(&pool)
            .await;
        pool.close().await;

        match version {
            Ok(Some(version)) => ConnectionTest::ok(version),
            Ok(None) => ConnectionTest::ok("Connected"),
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
        let session = guard.as_mut().ok_or(DriverError::NotConnected("MySQL"))?;

        let sql = query.trim();
        if sql.is_empty() {
            return Ok(QueryResult::failed(QueryErrorKind::Invalid, "Empty query"));
        }

        let (sql, values) = bind_pyformat(sql, params);
        let start = Instant::now();
        let outcome = {
            let _running = RunningGuard::enter(&self.running);
            Self::run_on_session(&mut session.conn, &sql, values, limit, offset).await
        };

        let result = outcome.unwrap_or_else(|e| {
            tracing::debug!(error = %e, "MySQL query failed");
            query_failed(e)
        });
        Ok(result.with_elapsed(start.elapsed()))
    }

    async fn get_schemas(&self) -> DriverResult<Vec<String>> {
        self.list_databases().await
    }

    async fn get_tables(&self, schema: Option<&str>) -> DriverResult<Vec<TableInfo>> {
        match self.schema_or_current(schema) {
            Some(schema) => self.list_tables(&schema).await,
            None => Ok(Vec::new()),
        }
    }

    async fn get_columns(&self, table: &str, schema: Option<&str>) -> DriverResult<Vec<ColumnDef>> {
        match self.schema_or_current(schema) {
            Some(schema) => self.list_columns(&schema, table).await,
            None => Ok(Vec::new()),
        }
    }

    async fn get_indexes(&self, table: &str, schema: Option<&str>) -> DriverResult<Vec<IndexInfo>> {
        match self.schema_or_current(schema) {
            Some(schema) => self.list_indexes(&schema, table).await,
            None => Ok(Vec::new()),
        }
    }

    async fn get_foreign_keys(
        &self,
        table: &str,
        schema: Option<&str>,
    ) -> DriverResult<Vec<ForeignKeyInfo>> {
        match self.schema_or_current(schema) {
            Some(schema) => self.list_foreign_keys(&schema, table).await,
            None => Ok(Vec::new()),
        }
    }

    async fn get_table_preview(
        &self,
        table: &str,
        schema: Option<&str>,
        limit: usize,
    ) -> DriverResult<QueryResult> {
        let target = match self.schema_or_current(schema) {
            Some(schema) => format!("{}.{}", quote_backtick(&schema), quote_backtick(table)),
            None => quote_backtick(table),
        };
        self.execute(&format!("SELECT * FROM {} LIMIT {}", target, limit), None, None, 0)
            .await
    }

    async fn explain_query(&self, query: &str) -> DriverResult<String> {
        let result = self
            .execute(&format!("EXPLAIN {}", query), None, None, 0)
            .await?;
        if let Some(error) = result.error_message() {
            return Ok(format!("Error: {}", error));
        }
        Ok(format_plan_table(&result))
    }

    async fn cancel_query(&self) -> DriverResult<bool> {
        if !self.running.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let Some(id) = self.connection_id.lock().ok().and_then(|id| *id) else {
            return Ok(false);
        };
        let pool = self.get_pool().await?;

        // KILL cannot be prepared; a plain &str runs over the text protocol
        let kill = format!("KILL QUERY {}", id);
        pool.execute(kill.as_str()).await.map_err(backend_error)?;
        tracing::debug!(connection_id = id, "Issued KILL QUERY");
        Ok(true)
    }

    async fn set_schema(&self, schema: &str) -> DriverResult<bool> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(DriverError::NotConnected("MySQL"))?;

        let use_db = format!("USE {}", quote_backtick(schema));
        let switched = (&mut session.conn).execute(use_db.as_str()).await;

        match switched {
            Ok(_) => {
                if let Ok(mut database) = self.database.lock() {
                    *database = Some(schema.to_string());
                }
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(schema, error = %e, "Failed to switch database");
                Ok(false)
            }
        }
    }

    fn current_schema(&self) -> Option<String> {
        self.database.lock().ok().and_then(|d| d.clone())
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        quote_backtick(identifier)
    }
}
