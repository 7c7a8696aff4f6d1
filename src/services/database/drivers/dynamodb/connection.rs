//! Amazon DynamoDB driver implementation.
//!
//! The AWS SDK needs a Tokio reactor. Each connection owns a small Tokio
//! runtime, and SDK futures are driven to completion on the driver's
//! `BlockingExecutor` so the caller's executor never has to be Tokio.
//!
//! Statements starting with SELECT, INSERT, UPDATE or DELETE run as PartiQL;
//! any other text is taken as a table name and scanned.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_lock::RwLock;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::config::http::HttpResponse;
use aws_sdk_dynamodb::config::{Credentials, Region};
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::operation::execute_statement::ExecuteStatementOutput;
use aws_sdk_dynamodb::operation::list_tables::ListTablesError;
use aws_sdk_dynamodb::operation::scan::ScanOutput;
use aws_sdk_dynamodb::types::AttributeValue;

use super::schema;
use super::types::{DynamoValueConverter, Item};
use crate::error::{DriverError, DriverResult};
use crate::services::database::blocking::BlockingExecutor;
use crate::services::database::traits::{
    BoxedDriver, ColumnDef, ConnectionField, ConnectionTest, DatabaseDriver, DriverCapabilities,
    DriverParams, DriverType, FieldType, QueryErrorKind, QueryParams, QueryResult, TableInfo,
};

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_SCAN_LIMIT: usize = 100;
const PARTIQL_PREFIXES: &[&str] = &["SELECT", "INSERT", "UPDATE", "DELETE"];

const REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "eu-west-2",
    "eu-central-1",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-south-1",
    "sa-east-1",
];

/// Error codes DynamoDB returns for bad or expired credentials
const AUTH_ERROR_CODES: &[&str] = &[
    "UnrecognizedClientException",
    "InvalidSignatureException",
    "AccessDeniedException",
    "ExpiredTokenException",
    "MissingAuthenticationTokenException",
];

/// A connected client and the runtime that drives it.
struct Session {
    runtime: tokio::runtime::Runtime,
    client: Client,
    region: String,
}

impl Session {
    fn open(params: &DriverParams) -> DriverResult<Self> {
        let region = params.string_or("region", DEFAULT_REGION);
        if let Some(endpoint) = params.str("endpoint") {
            url::Url::parse(endpoint)
                .map_err(|e| DriverError::InvalidConfig(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("dbview-dynamodb")
            .enable_all()
            .build()
            .map_err(|e| DriverError::Backend(format!("failed to start AWS runtime: {}", e)))?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.clone()));
        if let (Some(access_key), Some(secret_key)) = (params.str("access_key"), params.str("secret_key")) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "dbview",
            ));
        }
        if let Some(endpoint) = params.str("endpoint") {
            loader = loader.endpoint_url(endpoint);
        }

        let config = runtime.block_on(loader.load());
        let client = Client::new(&config);
        Ok(Self {
            runtime,
            client,
            region,
        })
    }

    /// Drive an SDK call to completion on this session's runtime.
    fn block_on<T, F, Fut>(&self, f: F) -> T
    where
        F: FnOnce(Client) -> Fut,
        Fut: Future<Output = T>,
    {
        self.runtime.block_on(f(self.client.clone()))
    }

    /// Verify the endpoint and credentials; returns the number of tables seen.
    fn check_access(&self) -> DriverResult<usize> {
        self.block_on(|client| async move { client.list_tables().limit(1).send().await })
            .map(|output| output.table_names().len())
            .map_err(connect_error)
    }
}

/// Amazon DynamoDB driver.
pub struct DynamoDbDriver {
    session: RwLock<Option<Arc<Session>>>,
    /// Region of the live session, readable from sync code
    region: Mutex<Option<String>>,
    executor: BlockingExecutor,
}

impl std::fmt::Debug for DynamoDbDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDbDriver")
            .field("region", &self.current_schema())
            .field("client", &"<aws_sdk_dynamodb::Client>")
            .finish()
    }
}

impl Default for DynamoDbDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Best message the SDK offers for an error.
fn sdk_message<E, R>(err: &SdkError<E, R>) -> String
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    err.message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(err).to_string())
}

/// Map an SDK error raised while connecting to the connection taxonomy.
fn connect_error<E, R>(err: SdkError<E, R>) -> DriverError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = sdk_message(&err);
    match &err {
        SdkError::ServiceError(_) if err.code().is_some_and(|code| AUTH_ERROR_CODES.contains(&code)) => {
            DriverError::AuthRejected(message)
        }
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => DriverError::Unreachable(message),
        SdkError::ConstructionFailure(_) => DriverError::InvalidConfig(message),
        _ => DriverError::Backend(message),
    }
}

fn query_failed<E, R>(err: SdkError<E, R>) -> QueryResult
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    tracing::debug!(error = %DisplayErrorContext(&err), "DynamoDB request failed");
    QueryResult::failed(QueryErrorKind::Backend, sdk_message(&err))
}

/// Whether `statement` is PartiQL rather than a table name.
pub(crate) fn is_partiql(statement: &str) -> bool {
    let first_word = statement.split_whitespace().next().unwrap_or("");
    PARTIQL_PREFIXES
        .iter()
        .any(|prefix| first_word.eq_ignore_ascii_case(prefix))
}

/// Drop the first `offset` items and keep at most `limit`.
fn page_items(items: Vec<Item>, limit: Option<usize>, offset: usize) -> (Vec<Item>, bool) {
    let mut items: Vec<Item> = items.into_iter().skip(offset).collect();
    let truncated = limit.is_some_and(|limit| items.len() > limit);
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    (items, truncated)
}

/// Items to ask a scan for so that `offset` can be skipped locally.
fn scan_request_limit(limit: usize, offset: usize) -> i32 {
    i32::try_from(limit.saturating_add(offset)).unwrap_or(i32::MAX)
}

/// Result grid for a PartiQL response; a continuation token means more rows.
fn partiql_result(output: ExecuteStatementOutput) -> QueryResult {
    let has_more = output.next_token.is_some();
    let items = output.items.unwrap_or_default();
    DynamoValueConverter::items_to_result(&items, true).with_has_more(has_more)
}

/// Result grid for one scan page after skipping `offset` items.
fn scan_result(output: ScanOutput, limit: usize, offset: usize) -> QueryResult {
    let more_pages = output.last_evaluated_key.is_some();
    let (items, truncated) = page_items(output.items.unwrap_or_default(), Some(limit), offset);
    DynamoValueConverter::items_to_result(&items, false).with_has_more(more_pages || truncated)
}

impl DynamoDbDriver {
    pub fn new() -> Self {
        Self {
            session: RwLock::new(None),
            region: Mutex::new(None),
            executor: BlockingExecutor::new("dynamodb"),
        }
    }

    /// Create a boxed driver (for registry use).
    pub fn boxed() -> BoxedDriver {
        Box::new(Self::new())
    }

    pub fn capabilities() -> DriverCapabilities {
        DriverCapabilities::default()
    }

    pub fn connection_fields() -> Vec<ConnectionField> {
        vec![
            ConnectionField::new("region", "AWS Region", FieldType::Dropdown)
                .required()
                .with_default(DEFAULT_REGION)
                .with_options(REGIONS)
                .with_tooltip("AWS region where your DynamoDB tables are located"),
            ConnectionField::new("access_key", "Access Key ID", FieldType::Text)
                .with_placeholder("Leave empty to use default credentials")
                .with_tooltip("AWS Access Key ID (optional if using IAM roles or environment variables)"),
            ConnectionField::new("secret_key", "Secret Access Key", FieldType::Password)
                .with_placeholder("Leave empty to use default credentials"),
            ConnectionField::new("endpoint", "Custom Endpoint", FieldType::Text)
                .with_placeholder("http://localhost:8000 (for local DynamoDB)")
                .with_tooltip("Custom endpoint URL for DynamoDB Local or other compatible services"),
        ]
    }

    async fn get_session(&self) -> DriverResult<Arc<Session>> {
        let guard = self.session.read().await;
        guard
            .as_ref()
            .cloned()
            .ok_or(DriverError::NotConnected("DynamoDB"))
    }

    /// Run an SDK call for the connected session on a worker thread.
    async fn call<T, F, Fut>(&self, f: F) -> DriverResult<T>
    where
        F: FnOnce(Client) -> Fut + Send + 'static,
        Fut: Future<Output = T>,
        T: Send + 'static,
    {
        let session = self.get_session().await?;
        Ok(self
            .executor
            .run(move || session.block_on(f))
            .await)
    }

    async fn execute_partiql(&self, statement: String, parameters: Vec<AttributeValue>) -> DriverResult<QueryResult> {
        let response = self
            .call(move |client| async move {
                client
                    .execute_statement()
                    .statement(statement)
                    .set_parameters((!parameters.is_empty()).then_some(parameters))
                    .send()
                    .await
            })
            .await?;

        Ok(match response {
            Ok(output) => partiql_result(output),
            Err(e) => query_failed(e),
        })
    }

    async fn scan_table(&self, table: String, limit: usize, offset: usize) -> DriverResult<QueryResult> {
        let request_limit = scan_request_limit(limit, offset);
        let response = self
            .call(move |client| async move {
                client
                    .scan()
                    .table_name(table)
                    .limit(request_limit)
                    .send()
                    .await
            })
            .await?;

        Ok(match response {
            Ok(output) => scan_result(output, limit, offset),
            Err(e) => query_failed(e),
        })
    }
}

#[async_trait]
impl DatabaseDriver for DynamoDbDriver {
    fn driver_type(&self) -> DriverType {
        DriverType::DynamoDB
    }

    fn capabilities(&self) -> DriverCapabilities {
        Self::capabilities()
    }

    async fn connect(&self, params: &DriverParams) -> DriverResult<()> {
        let params = params.clone();
        let session = self
            .executor
            .run(move || -> DriverResult<Session> {
                let session = Session::open(&params)?;
                session.check_access()?;
                Ok(session)
            })
            .await?;

        tracing::info!(region = %session.region, "Connected to DynamoDB");
        if let Ok(mut region) = self.region.lock() {
            *region = Some(session.region.clone());
        }
        let previous = self.session.write().await.replace(Arc::new(session));
        if let Some(previous) = previous {
            self.executor.run(move || drop(previous)).await;
        }
        Ok(())
    }

    async fn disconnect(&self) -> DriverResult<()> {
        if let Ok(mut region) = self.region.lock() {
            *region = None;
        }
        let session = self.session.write().await.take();
        if let Some(session) = session {
            // Dropping the runtime joins its worker thread
            self.executor.run(move || drop(session)).await;
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.session.read().await.is_some()
    }

    async fn test_connection(&self, params: &DriverParams) -> ConnectionTest {
        let params = params.clone();
        let outcome = self
            .executor
            .run(move || -> DriverResult<(String, usize)> {
                let session = Session::open(&params)?;
                let tables = session.check_access()?;
                Ok((session.region.clone(), tables))
            })
            .await;

        match outcome {
            Ok((region, tables)) => ConnectionTest::ok(format!("DynamoDB ({}) - {}+ tables", region, tables)),
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
        self.get_session().await?;

        let statement = query.trim();
        if statement.is_empty() {
            return Ok(QueryResult::failed(QueryErrorKind::Invalid, "Empty query"));
        }

        let start = Instant::now();
        let result = if is_partiql(statement) {
            let parameters = params
                .map(|p| p.values().into_iter().map(DynamoValueConverter::to_attribute).collect())
                .unwrap_or_default();
            self.execute_partiql(statement.to_string(), parameters)
                .await?
                .paginate(limit, offset)
        } else {
            self.scan_table(statement.to_string(), limit.unwrap_or(DEFAULT_SCAN_LIMIT), offset)
                .await?
        };

        Ok(result.with_elapsed(start.elapsed()))
    }

    async fn get_schemas(&self) -> DriverResult<Vec<String>> {
        Ok(self.current_schema().into_iter().collect())
    }

    async fn get_tables(&self, _schema: Option<&str>) -> DriverResult<Vec<TableInfo>> {
        let session = self.get_session().await?;
        let region = session.region.clone();

        let names = self
            .call(|client| async move {
                let mut names = Vec::new();
                let mut start_after: Option<String> = None;
                loop {
                    let page = client
                        .list_tables()
                        .set_exclusive_start_table_name(start_after.take())
                        .send()
                        .await?;
                    names.extend(page.table_names().iter().cloned());
                    match page.last_evaluated_table_name() {
                        Some(last) => start_after = Some(last.to_string()),
                        None => break,
                    }
                }
                Ok::<_, SdkError<ListTablesError, HttpResponse>>(names)
            })
            .await?;
        let names = match names {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(error = %DisplayErrorContext(&e), "Failed to list DynamoDB tables");
                return Ok(Vec::new());
            }
        };

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let table_name = name.clone();
            let described = self
                .call(move |client| async move {
                    client.describe_table().table_name(table_name).send().await
                })
                .await?;

            tables.push(match described.ok().and_then(|output| output.table) {
                Some(table) => schema::table_info(&name, &region, &table),
                None => TableInfo::new(name).with_schema(region.clone()).with_type("table"),
            });
        }
        Ok(tables)
    }

    async fn get_columns(&self, table: &str, _schema: Option<&str>) -> DriverResult<Vec<ColumnDef>> {
        let table_name = table.to_string();
        let described = self
            .call(move |client| async move {
                client.describe_table().table_name(table_name).send().await
            })
            .await?;

        match described {
            Ok(output) => Ok(output
                .table
                .as_ref()
                .map(schema::key_columns)
                .unwrap_or_default()),
            Err(e) => {
                tracing::warn!(table, error = %DisplayErrorContext(&e), "Failed to describe DynamoDB table");
                Ok(Vec::new())
            }
        }
    }

    async fn get_table_preview(
        &self,
        table: &str,
        _schema: Option<&str>,
        limit: usize,
    ) -> DriverResult<QueryResult> {
        let start = Instant::now();
        let result = self.scan_table(table.to_string(), limit, 0).await?;
        Ok(result.with_elapsed(start.elapsed()))
    }

    async fn set_schema(&self, schema: &str) -> DriverResult<bool> {
        let session = self.get_session().await?;
        Ok(session.region == schema)
    }

    fn current_schema(&self) -> Option<String> {
        self.region.lock().ok().and_then(|region| region.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::drivers::dynamodb::types::VARIANT_TYPE;
    use crate::services::database::traits::Value;

    #[test]
    fn test_is_partiql() {
        assert!(is_partiql("SELECT * FROM \"orders\""));
        assert!(is_partiql("  insert INTO \"orders\" VALUE {'pk': 'a'}"));
        assert!(is_partiql("delete FROM t WHERE pk = 'a'"));
        assert!(!is_partiql("orders"));
        assert!(!is_partiql("selected_orders"));
    }

    #[test]
    fn test_page_items() {
        let items: Vec<Item> = (0..5)
            .map(|i| Item::from([("pk".to_string(), AttributeValue::N(i.to_string()))]))
            .collect();
        let (page, truncated) = page_items(items, Some(2), 2);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0]["pk"], AttributeValue::N("2".into()));
        assert!(truncated);
    }

    fn order(pk: &str, total: Option<&str>) -> Item {
        let mut item = Item::from([("pk".to_string(), AttributeValue::S(pk.to_string()))]);
        if let Some(total) = total {
            item.insert("total".to_string(), AttributeValue::N(total.to_string()));
        }
        item
    }

    #[test]
    fn test_partiql_result_shape() {
        let output = ExecuteStatementOutput::builder()
            .items(order("a", Some("12")))
            .items(order("b", None))
            .next_token("page-2")
            .build();
        let result = partiql_result(output);

        let names: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["pk", "total"]);
        assert_eq!(result.columns[1].type_name, "int");
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[0].get(1), Some(&Value::Int(12)));
        assert_eq!(result.rows[1].get(1), Some(&Value::Null));
        assert!(result.has_more);

        let last_page = partiql_result(ExecuteStatementOutput::builder().build());
        assert!(last_page.is_success());
        assert_eq!(last_page.row_count, 0);
        assert!(!last_page.has_more);
    }

    #[test]
    fn test_scan_result_pages_items() {
        let items: Vec<Item> = ["a", "b", "c", "d"].iter().map(|pk| order(pk, None)).collect();

        let result = scan_result(
            ScanOutput::builder().set_items(Some(items.clone())).build(),
            2,
            1,
        );
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[0].get(0), Some(&Value::from("b")));
        assert_eq!(result.columns[0].type_name, VARIANT_TYPE);
        assert!(result.has_more);

        let tail = scan_result(
            ScanOutput::builder().set_items(Some(items.clone())).build(),
            10,
            0,
        );
        assert_eq!(tail.row_count, 4);
        assert!(!tail.has_more);

        let continued = scan_result(
            ScanOutput::builder()
                .set_items(Some(items))
                .last_evaluated_key("pk", AttributeValue::S("d".into()))
                .build(),
            10,
            0,
        );
        assert!(continued.has_more);
    }

    #[test]
    fn test_huge_limit_does_not_overflow() {
        assert_eq!(scan_request_limit(100, 20), 120);
        assert_eq!(scan_request_limit(usize::MAX, 5), i32::MAX);
        assert_eq!(scan_request_limit(5, usize::MAX), i32::MAX);

        let items = vec![order("a", None), order("b", None)];
        let (page, truncated) = page_items(items, Some(usize::MAX), 1);
        assert_eq!(page.len(), 1);
        assert!(!truncated);
    }

    #[test]
    fn test_not_connected() {
        let driver = DynamoDbDriver::new();
        assert!(!smol::block_on(driver.is_connected()));
        assert!(matches!(
            smol::block_on(driver.execute("orders", None, None, 0)),
            Err(DriverError::NotConnected("DynamoDB"))
        ));
        assert!(smol::block_on(driver.get_schemas()).unwrap().is_empty());
        assert_eq!(driver.current_schema(), None);
    }

    #[test]
    fn test_connection_fields() {
        let fields = DynamoDbDriver::connection_fields();
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["region", "access_key", "secret_key", "endpoint"]);
        assert_eq!(fields[0].field_type, FieldType::Dropdown);
        assert!(fields[0].options.contains(&"eu-central-1".to_string()));
    }

    #[test]
    fn test_invalid_endpoint_is_invalid_config() {
        let params = DriverParams::new()
            .with("region", "eu-west-1")
            .with("endpoint", "not a url");
        assert!(matches!(
            Session::open(&params),
            Err(DriverError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_capabilities() {
        let caps = DynamoDbDriver::new().capabilities();
        assert!(!caps.supports_schemas);
        assert!(!caps.supports_cancel);
        assert!(!caps.supports_explain);
    }
}
