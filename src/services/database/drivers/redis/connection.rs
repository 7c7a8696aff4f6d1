//! Redis driver implementation.
//!
//! The `redis` client used here is synchronous; every call goes through the
//! driver's `BlockingExecutor` so the async runtime never blocks on a socket.
//! Database numbers stand in for schemas and key prefixes for tables.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::{Connection, ConnectionLike, ErrorKind, RedisError, RedisResult};
use url::Url;

use super::commands::{format_reply, invalid_command, parse_command, run_command};
use super::schema;
use crate::error::{DriverError, DriverResult};
use crate::services::database::blocking::BlockingExecutor;
use crate::services::database::traits::{
    BoxedDriver, ColumnDef, ConnectionField, ConnectionTest, DatabaseDriver, DriverCapabilities,
    DriverParams, DriverType, FieldType, QueryErrorKind, QueryParams, QueryResult, TableInfo,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const DATABASE_COUNT: i64 = 16;

/// A live connection behind a box so tests can script the server side.
pub(crate) struct RedisLink(Box<dyn ConnectionLike + Send>);

impl RedisLink {
    pub(crate) fn new(conn: impl ConnectionLike + Send + 'static) -> Self {
        Self(Box::new(conn))
    }
}

impl ConnectionLike for RedisLink {
    fn req_packed_command(&mut self, cmd: &[u8]) -> RedisResult<redis::Value> {
        self.0.req_packed_command(cmd)
    }

    fn req_packed_commands(
        &mut self,
        cmd: &[u8],
        offset: usize,
        count: usize,
    ) -> RedisResult<Vec<redis::Value>> {
        self.0.req_packed_commands(cmd, offset, count)
    }

    fn req_command(&mut self, cmd: &redis::Cmd) -> RedisResult<redis::Value> {
        self.0.req_command(cmd)
    }

    fn get_db(&self) -> i64 {
        self.0.get_db()
    }

    fn supports_pipelining(&self) -> bool {
        self.0.supports_pipelining()
    }

    fn check_connection(&mut self) -> bool {
        self.0.check_connection()
    }

    fn is_open(&self) -> bool {
        self.0.is_open()
    }
}

/// Connection state shared with worker threads.
struct RedisState {
    conn: Mutex<Option<RedisLink>>,
    /// Mirrors `conn.is_some()` without taking the lock from async code
    connected: AtomicBool,
    db: AtomicI64,
}

impl RedisState {
    /// Run `f` against the live connection.
    ///
    /// A dropped socket clears the connection so later calls report
    /// `NotConnected` instead of failing one by one.
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut RedisLink) -> RedisResult<T>,
    ) -> DriverResult<RedisResult<T>> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = guard.as_mut().ok_or(DriverError::NotConnected("Redis"))?;
        let outcome = f(conn);
        if let Err(e) = &outcome {
            if e.is_connection_dropped() {
                tracing::warn!(error = %e, "Redis connection dropped");
                *guard = None;
                self.connected.store(false, Ordering::SeqCst);
            }
        }
        Ok(outcome)
    }

    fn replace(&self, conn: Option<RedisLink>) {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        self.connected.store(conn.is_some(), Ordering::SeqCst);
        *guard = conn;
    }
}

/// Redis driver.
pub struct RedisDriver {
    state: Arc<RedisState>,
    executor: BlockingExecutor,
}

impl std::fmt::Debug for RedisDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDriver")
            .field("db", &self.state.db.load(Ordering::SeqCst))
            .field("connected", &self.state.connected.load(Ordering::SeqCst))
            .finish()
    }
}

impl Default for RedisDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl RedisDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RedisState {
                conn: Mutex::new(None),
                connected: AtomicBool::new(false),
                db: AtomicI64::new(0),
            }),
            executor: BlockingExecutor::new("redis"),
        }
    }

    /// A driver already attached to `conn`.
    #[cfg(test)]
    fn with_connection(conn: impl ConnectionLike + Send + 'static) -> Self {
        let driver = Self::new();
        driver.state.replace(Some(RedisLink::new(conn)));
        driver
    }

    /// Create a boxed driver (for registry use).
    pub fn boxed() -> BoxedDriver {
        Box::new(Self::new())
    }

    pub fn capabilities() -> DriverCapabilities {
        DriverCapabilities {
            supports_schemas: true,
            ..Default::default()
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
                .with_default(DriverType::Redis.default_port()),
            ConnectionField::new("database", "Database Number", FieldType::Number)
                .with_default(0)
                .with_placeholder("0-15")
                .with_tooltip("Redis database number (0-15 by default)"),
            ConnectionField::new("password", "Password", FieldType::Password)
                .with_placeholder("Leave empty for no password"),
            ConnectionField::new("ssl", "Use SSL/TLS", FieldType::Checkbox)
                .with_default(false)
                .with_tooltip("Enable SSL/TLS encrypted connection"),
        ]
    }

    /// Build the `redis://` (or `rediss://`) URL for `params`.
    pub(crate) fn connection_url(params: &DriverParams) -> DriverResult<Url> {
        let host = params.string_or("host", "localhost");
        let port = params.port("port").unwrap_or(DriverType::Redis.default_port());
        let db = Self::database_number(params)?;
        let scheme = if params.bool("ssl") { "rediss" } else { "redis" };

        let mut url = Url::parse(&format!("{}://{}:{}/{}", scheme, host, port, db))
            .map_err(|e| DriverError::InvalidConfig(format!("invalid Redis address: {}", e)))?;
        if let Some(username) = params.str("username") {
            url.set_username(username)
                .map_err(|_| DriverError::InvalidConfig("invalid Redis username".into()))?;
        }
        if let Some(password) = params.str("password") {
            url.set_password(Some(password))
                .map_err(|_| DriverError::InvalidConfig("invalid Redis password".into()))?;
        }
        Ok(url)
    }

    fn database_number(params: &DriverParams) -> DriverResult<i64> {
        match params.get("database") {
            None => Ok(0),
            Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(0),
            Some(_) => params
                .i64("database")
                .filter(|db| *db >= 0)
                .ok_or_else(|| DriverError::InvalidConfig("database must be a number".into())),
        }
    }

    /// Open, configure and ping a connection.
    fn open_connection(url: &Url) -> DriverResult<Connection> {
        let client = redis::Client::open(url.as_str()).map_err(connect_error)?;
        let mut conn = client
            .get_connection_with_timeout(CONNECT_TIMEOUT)
            .map_err(connect_error)?;
        conn.set_read_timeout(Some(READ_TIMEOUT))
            .map_err(connect_error)?;
        redis::cmd("PING")
            .query::<String>(&mut conn)
            .map_err(connect_error)?;
        Ok(conn)
    }

    fn ensure_connected(&self) -> DriverResult<()> {
        if self.state.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DriverError::NotConnected("Redis"))
        }
    }

    fn current_db(&self) -> i64 {
        self.state.db.load(Ordering::SeqCst)
    }
}

/// Map a redis error raised while connecting to the connection taxonomy.
pub(crate) fn connect_error(err: RedisError) -> DriverError {
    let auth_code = matches!(err.code(), Some("NOAUTH") | Some("WRONGPASS"));
    if err.kind() == ErrorKind::AuthenticationFailed || auth_code {
        DriverError::AuthRejected(err.to_string())
    } else if err.is_connection_refusal() || err.is_timeout() || err.is_io_error() {
        DriverError::Unreachable(err.to_string())
    } else if err.kind() == ErrorKind::InvalidClientConfig {
        DriverError::InvalidConfig(err.to_string())
    } else {
        DriverError::Backend(err.to_string())
    }
}

fn backend_failure(err: RedisError) -> QueryResult {
    QueryResult::failed(QueryErrorKind::Backend, err.to_string())
}

#[async_trait]
impl DatabaseDriver for RedisDriver {
    fn driver_type(&self) -> DriverType {
        DriverType::Redis
    }

    fn capabilities(&self) -> DriverCapabilities {
        Self::capabilities()
    }

    async fn connect(&self, params: &DriverParams) -> DriverResult<()> {
        let url = Self::connection_url(params)?;
        let db = Self::database_number(params)?;

        let conn = self
            .executor
            .run(move || Self::open_connection(&url))
            .await?;

        self.state.db.store(db, Ordering::SeqCst);
        self.executor
            .run_with(&self.state, move |state| state.replace(Some(RedisLink::new(conn))))
            .await;
        tracing::info!(db, "Connected to Redis");
        Ok(())
    }

    async fn disconnect(&self) -> DriverResult<()> {
        self.executor
            .run_with(&self.state, |state| state.replace(None))
            .await;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    async fn test_connection(&self, params: &DriverParams) -> ConnectionTest {
        let url = match Self::connection_url(params) {
            Ok(url) => url,
            Err(e) => return ConnectionTest::failed(e.to_string()),
        };

        let outcome = self
            .executor
            .run(move || -> DriverResult<String> {
                let mut conn = Self::open_connection(&url)?;
                let info: String = redis::cmd("INFO")
                    .arg("server")
                    .query(&mut conn)
                    .map_err(|e| DriverError::Backend(e.to_string()))?;
                Ok(super::commands::parse_info(&info)
                    .into_iter()
                    .find(|(key, _)| key == "redis_version")
                    .map(|(_, version)| version)
                    .unwrap_or_else(|| "Unknown".to_string()))
            })
            .await;

        match outcome {
            Ok(version) => ConnectionTest::ok(format!("Redis {}", version)),
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
        self.ensure_connected()?;
        if params.is_some_and(|p| !p.is_empty()) {
            tracing::debug!("Redis commands take no bound parameters; ignoring them");
        }

        let command = match parse_command(query) {
            Ok(command) => command,
            Err(message) => return Ok(invalid_command(message)),
        };

        let start = Instant::now();
        let reply = self
            .executor
            .run_with(&self.state, move |state| {
                state.with_conn(|conn| run_command(conn, command))
            })
            .await?;

        let result = match reply {
            Ok(reply) => format_reply(reply).paginate(limit, offset),
            Err(e) => {
                tracing::debug!(error = %e, "Redis command failed");
                backend_failure(e)
            }
        };
        Ok(result.with_elapsed(start.elapsed()))
    }

    async fn get_schemas(&self) -> DriverResult<Vec<String>> {
        Ok((0..DATABASE_COUNT).map(|db| db.to_string()).collect())
    }

    async fn get_tables(&self, _schema: Option<&str>) -> DriverResult<Vec<TableInfo>> {
        self.ensure_connected()?;
        let db = self.current_db();
        let tables = self
            .executor
            .run_with(&self.state, move |state| {
                state.with_conn(|conn| schema::key_groups(conn, db))
            })
            .await?;

        Ok(tables.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to sample Redis keys");
            Vec::new()
        }))
    }

    async fn get_columns(&self, table: &str, _schema: Option<&str>) -> DriverResult<Vec<ColumnDef>> {
        self.ensure_connected()?;
        let key = table.to_string();
        let columns = self
            .executor
            .run_with(&self.state, move |state| {
                state.with_conn(|conn| schema::key_columns(conn, &key))
            })
            .await?;

        Ok(columns.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to inspect Redis key");
            Vec::new()
        }))
    }

    async fn get_table_preview(
        &self,
        table: &str,
        _schema: Option<&str>,
        limit: usize,
    ) -> DriverResult<QueryResult> {
        self.ensure_connected()?;
        let key = table.to_string();
        let start = Instant::now();
        let preview = self
            .executor
            .run_with(&self.state, move |state| {
                state.with_conn(|conn| schema::key_preview(conn, &key, limit))
            })
            .await?;

        Ok(preview
            .unwrap_or_else(backend_failure)
            .with_elapsed(start.elapsed()))
    }

    async fn set_schema(&self, schema: &str) -> DriverResult<bool> {
        self.ensure_connected()?;
        let Ok(db) = schema.trim().parse::<i64>() else {
            return Ok(false);
        };

        let selected = self
            .executor
            .run_with(&self.state, move |state| {
                state.with_conn(|conn| redis::cmd("SELECT").arg(db).query::<()>(conn))
            })
            .await?;

        match selected {
            Ok(()) => {
                self.state.db.store(db, Ordering::SeqCst);
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(db, error = %e, "Failed to select Redis database");
                Ok(false)
            }
        }
    }

    fn current_schema(&self) -> Option<String> {
        Some(self.current_db().to_string())
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        identifier.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::drivers::redis::scripted::ScriptedConnection;
    use crate::services::database::traits::Value;

    #[test]
    fn test_connection_url() {
        let params = DriverParams::new()
            .with("host", "cache.internal")
            .with("port", 6380)
            .with("database", "3")
            .with("password", "s3cret");
        let url = RedisDriver::connection_url(&params).unwrap();
        assert_eq!(url.as_str(), "redis://:s3cret@cache.internal:6380/3");
    }

    #[test]
    fn test_connection_url_defaults_and_tls() {
        let url = RedisDriver::connection_url(&DriverParams::new().with("ssl", true)).unwrap();
        assert_eq!(url.as_str(), "rediss://localhost:6379/0");
    }

    #[test]
    fn test_non_numeric_database_is_invalid_config() {
        let params = DriverParams::new().with("database", "cache");
        assert!(matches!(
            RedisDriver::connection_url(&params),
            Err(DriverError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_not_connected() {
        let driver = RedisDriver::new();
        assert!(!smol::block_on(driver.is_connected()));
        assert!(matches!(
            smol::block_on(driver.execute("GET a", None, None, 0)),
            Err(DriverError::NotConnected("Redis"))
        ));
        assert!(matches!(
            smol::block_on(driver.get_tables(None)),
            Err(DriverError::NotConnected(_))
        ));
    }

    #[test]
    fn test_execute_get_returns_value_column() {
        let conn = ScriptedConnection::new([redis::Value::BulkString(b"hello".to_vec())]);
        let driver = RedisDriver::with_connection(conn.clone());

        let result = smol::block_on(driver.execute("GET mykey", None, None, 0)).unwrap();
        assert!(result.is_success());
        assert_eq!(result.columns.len(), 1);
        assert_eq!(result.columns[0].name, "value");
        assert_eq!(result.row_count, 1);
        assert_eq!(result.rows[0].values(), &[Value::from("hello")]);
        assert_eq!(conn.sent(), vec![vec!["GET".to_string(), "mykey".to_string()]]);
    }

    #[test]
    fn test_execute_pages_list_replies() {
        let keys = (0..5)
            .map(|i| redis::Value::BulkString(format!("user:{}", i).into_bytes()))
            .collect();
        let conn = ScriptedConnection::new([redis::Value::Array(keys)]);
        let driver = RedisDriver::with_connection(conn.clone());

        let result = smol::block_on(driver.execute("keys user:*", None, Some(2), 1)).unwrap();
        assert_eq!(result.row_count, 2);
        assert!(result.has_more);
        assert_eq!(result.rows[0].get(0), Some(&Value::from("user:1")));
        assert_eq!(conn.sent(), vec![vec!["KEYS".to_string(), "user:*".to_string()]]);
    }

    #[test]
    fn test_execute_folds_errors_into_result() {
        let conn = ScriptedConnection::from_results([Err(RedisError::from((
            ErrorKind::ResponseError,
            "WRONGTYPE Operation against a key holding the wrong kind of value",
        )))]);
        let driver = RedisDriver::with_connection(conn.clone());

        let failed = smol::block_on(driver.execute("GET h", None, None, 0)).unwrap();
        assert_eq!(failed.error.as_ref().map(|e| e.kind), Some(QueryErrorKind::Backend));
        assert!(failed.error_message().unwrap().contains("WRONGTYPE"));

        let invalid = smol::block_on(driver.execute("HGET only-key", None, None, 0)).unwrap();
        assert_eq!(invalid.error_message(), Some("HGET requires key and field"));
        assert_eq!(conn.sent().len(), 1);
        assert!(smol::block_on(driver.is_connected()));
    }

    #[test]
    fn test_dropped_socket_disconnects() {
        let broken = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe");
        let conn = ScriptedConnection::from_results([Err(RedisError::from(broken))]);
        let driver = RedisDriver::with_connection(conn);

        let failed = smol::block_on(driver.execute("PING", None, None, 0)).unwrap();
        assert!(!failed.is_success());
        assert!(!smol::block_on(driver.is_connected()));
        assert!(matches!(
            smol::block_on(driver.execute("PING", None, None, 0)),
            Err(DriverError::NotConnected("Redis"))
        ));
    }

    #[test]
    fn test_schemas_are_database_numbers() {
        let driver = RedisDriver::new();
        let schemas = smol::block_on(driver.get_schemas()).unwrap();
        assert_eq!(schemas.len(), 16);
        assert_eq!(schemas[0], "0");
        assert_eq!(schemas[15], "15");
        assert_eq!(driver.current_schema().as_deref(), Some("0"));
    }

    #[test]
    fn test_identity_quoting_and_capabilities() {
        let driver = RedisDriver::new();
        assert_eq!(driver.quote_identifier("user:1"), "user:1");
        let caps = driver.capabilities();
        assert!(caps.supports_schemas);
        assert!(!caps.supports_cancel);
        assert!(!caps.supports_explain);
    }

    #[test]
    fn test_unreachable_server() {
        // Port 1 on loopback refuses connections
        let driver = RedisDriver::new();
        let params = DriverParams::new().with("host", "127.0.0.1").with("port", 1);
        let err = smol::block_on(driver.connect(&params)).unwrap_err();
        assert!(matches!(err, DriverError::Unreachable(_)));

        let test = smol::block_on(driver.test_connection(&params));
        assert!(!test.success);
    }
}
