//! Stateful query execution over one driver.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_channel::{Receiver, Sender};
use futures::future::{AbortHandle, AbortRegistration, Abortable, Aborted};
use uuid::Uuid;

use super::state::{QueryExecution, QueryState};
use crate::error::{DriverError, DriverResult};
use crate::services::database::traits::{
    DatabaseDriver, EXPLAIN_NOT_SUPPORTED, QueryErrorKind, QueryParams, QueryResult,
};
use crate::services::storage::{HistoryEntry, QueryHistory};

type StateObserver = Arc<dyn Fn(QueryState) + Send + Sync>;

/// Where finished executions are recorded.
#[derive(Debug, Clone)]
struct HistorySink {
    history: Arc<QueryHistory>,
    connection_id: String,
    connection_name: String,
}

/// The current execution plus the handles needed to stop and await it.
struct ActiveExecution {
    execution: QueryExecution,
    abort: AbortHandle,
    /// Closed when the execution has fully finished
    done: Receiver<()>,
}

#[derive(Default)]
struct ExecutorState {
    current: Option<ActiveExecution>,
}

/// Runs queries against one driver, one at a time.
///
/// Starting a query while another runs cancels the running one first. Each
/// transition is reported synchronously to registered observers, and
/// completed or failed executions are written to history when configured.
/// Clones share the same driver and state.
///
/// # Example
///
/// ```ignore
/// let executor = QueryExecutor::new(driver).with_history(history, &config.id, &config.name);
/// executor.on_state_change(|state| tracing::info!(%state, "query state"));
/// let result = executor.execute("SELECT * FROM users", None, Some(500)).await;
/// ```
#[derive(Clone)]
pub struct QueryExecutor {
    driver: Arc<dyn DatabaseDriver>,
    history: Option<HistorySink>,
    state: Arc<Mutex<ExecutorState>>,
    observers: Arc<Mutex<Vec<StateObserver>>>,
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("driver", &self.driver.driver_type())
            .field("history", &self.history)
            .field("state", &self.state())
            .finish()
    }
}

impl QueryExecutor {
    pub fn new(driver: Arc<dyn DatabaseDriver>) -> Self {
        Self {
            driver,
            history: None,
            state: Arc::new(Mutex::new(ExecutorState::default())),
            observers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record finished executions in `history` under the given connection.
    pub fn with_history(
        mut self,
        history: Arc<QueryHistory>,
        connection_id: impl Into<String>,
        connection_name: impl Into<String>,
    ) -> Self {
        self.history = Some(HistorySink {
            history,
            connection_id: connection_id.into(),
            connection_name: connection_name.into(),
        });
        self
    }

    pub fn driver(&self) -> &Arc<dyn DatabaseDriver> {
        &self.driver
    }

    /// Register a callback invoked on every state transition.
    pub fn on_state_change(&self, observer: impl Fn(QueryState) + Send + Sync + 'static) {
        lock(&self.observers).push(Arc::new(observer));
    }

    /// State of the current execution, `Idle` before the first one.
    pub fn state(&self) -> QueryState {
        lock(&self.state)
            .current
            .as_ref()
            .map_or(QueryState::Idle, |active| active.execution.state)
    }

    pub fn is_running(&self) -> bool {
        self.state() == QueryState::Running
    }

    /// Snapshot of the current (or most recent) execution.
    pub fn current_execution(&self) -> Option<QueryExecution> {
        lock(&self.state)
            .current
            .as_ref()
            .map(|active| active.execution.clone())
    }

    /// Result of the most recent execution, once it has finished.
    pub fn last_result(&self) -> Option<QueryResult> {
        lock(&self.state)
            .current
            .as_ref()
            .and_then(|active| active.execution.result.clone())
    }

    /// Execute `query`, cancelling any execution still in flight.
    ///
    /// Never fails: driver errors and cancellation are folded into the
    /// returned result's `error`.
    pub async fn execute(
        &self,
        query: &str,
        params: Option<&QueryParams>,
        limit: Option<usize>,
    ) -> QueryResult {
        let (id, registration, done) = loop {
            if let Some((previous_id, previous)) = self.active_completion() {
                self.cancel().await;
                self.await_completion(previous_id, &previous).await;
            }
            if let Some(started) = self.try_start(query) {
                break started;
            }
        };
        let _guard = ExecutionGuard {
            executor: self,
            id,
            done,
        };
        self.notify(QueryState::Running);
        tracing::debug!(execution = %id, driver = %self.driver.driver_type(), "Query started");

        let started_at = Instant::now();
        let outcome = Abortable::new(self.driver.execute(query, params, limit, 0), registration).await;
        let (state, result) = self.settle(id, outcome, started_at);

        self.notify(state);
        tracing::debug!(
            execution = %id,
            %state,
            elapsed_ms = result.execution_time_ms,
            rows = result.row_count,
            "Query finished"
        );

        if state != QueryState::Cancelled {
            self.record(query, &result).await;
        }
        result
    }

    /// Run `execute` on a spawned task and hand the result to `on_complete`.
    pub fn execute_in_background(
        &self,
        query: impl Into<String>,
        params: Option<QueryParams>,
        limit: Option<usize>,
        on_complete: impl FnOnce(&QueryResult) + Send + 'static,
    ) -> smol::Task<QueryResult> {
        let executor = self.clone();
        let query = query.into();
        smol::spawn(async move {
            let result = executor.execute(&query, params.as_ref(), limit).await;
            on_complete(&result);
            result
        })
    }

    /// Cancel the running execution and wait for it to wind down.
    ///
    /// Returns `false` when nothing was running. Native cancellation is
    /// attempted first on drivers that support it; its failure is ignored.
    pub async fn cancel(&self) -> bool {
        let (id, abort, done) = {
            let mut state = lock(&self.state);
            let Some(active) = state.current.as_mut() else {
                return false;
            };
            if active.execution.state != QueryState::Running {
                return false;
            }
            active.execution.state = QueryState::Cancelling;
            (active.execution.id, active.abort.clone(), active.done.clone())
        };
        self.notify(QueryState::Cancelling);

        if self.driver.capabilities().supports_cancel {
            match self.driver.cancel_query().await {
                Ok(acknowledged) => {
                    tracing::debug!(acknowledged, "Backend cancel requested");
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Backend cancel failed, aborting locally");
                }
            }
        }

        abort.abort();
        self.await_completion(id, &done).await;
        true
    }

    /// Execution plan for `query`, or a notice when the driver has none.
    pub async fn explain(&self, query: &str) -> DriverResult<String> {
        if !self.driver.capabilities().supports_explain {
            return Ok(EXPLAIN_NOT_SUPPORTED.to_string());
        }
        self.driver.explain_query(query).await
    }

    fn active_completion(&self) -> Option<(Uuid, Receiver<()>)> {
        lock(&self.state)
            .current
            .as_ref()
            .filter(|active| active.execution.state.is_active())
            .map(|active| (active.execution.id, active.done.clone()))
    }

    /// Wait for execution `id` to finish.
    ///
    /// Nothing is ever sent on `done`; it closes when the running future
    /// settles or is dropped. An execution still active after that point
    /// was abandoned mid-flight and is marked cancelled here.
    async fn await_completion(&self, id: Uuid, done: &Receiver<()>) {
        match done.recv().await {
            Ok(()) => {}
            Err(async_channel::RecvError) => {
                if self.abandon(id) {
                    tracing::warn!(execution = %id, "Query stopped without settling");
                    self.notify(QueryState::Cancelled);
                }
            }
        }
    }

    /// Mark execution `id` cancelled if it is still active.
    fn abandon(&self, id: Uuid) -> bool {
        let mut state = lock(&self.state);
        match state
            .current
            .as_mut()
            .filter(|active| active.execution.id == id && active.execution.state.is_active())
        {
            Some(active) => {
                active.execution.state = QueryState::Cancelled;
                active.execution.result = Some(QueryResult::cancelled());
                true
            }
            None => false,
        }
    }

    /// Install a new running execution unless another is still active.
    fn try_start(&self, query: &str) -> Option<(Uuid, AbortRegistration, Sender<()>)> {
        let mut state = lock(&self.state);
        if state
            .current
            .as_ref()
            .is_some_and(|active| active.execution.state.is_active())
        {
            return None;
        }

        let (abort, registration) = AbortHandle::new_pair();
        let (done_tx, done_rx) = async_channel::bounded(1);
        let mut execution = QueryExecution::new(query);
        execution.state = QueryState::Running;
        let id = execution.id;

        state.current = Some(ActiveExecution {
            execution,
            abort,
            done: done_rx,
        });
        Some((id, registration, done_tx))
    }

    /// Decide the terminal state and store the result on the execution.
    fn settle(
        &self,
        id: Uuid,
        outcome: Result<DriverResult<QueryResult>, Aborted>,
        started_at: Instant,
    ) -> (QueryState, QueryResult) {
        let mut state = lock(&self.state);
        let cancelling = state
            .current
            .as_ref()
            .is_some_and(|active| active.execution.state == QueryState::Cancelling);

        let (next, result) = match outcome {
            Err(Aborted) => (QueryState::Cancelled, QueryResult::cancelled()),
            Ok(_) if cancelling => (QueryState::Cancelled, QueryResult::cancelled()),
            Ok(Ok(result)) if result.is_success() => (QueryState::Completed, result),
            Ok(Ok(result)) => (QueryState::Failed, result),
            Ok(Err(e)) => (QueryState::Failed, failed_result(e)),
        };
        let result = if result.execution_time_ms == 0.0 {
            result.with_elapsed(started_at.elapsed())
        } else {
            result
        };

        if let Some(active) = state.current.as_mut().filter(|a| a.execution.id == id) {
            active.execution.state = next;
            active.execution.result = Some(result.clone());
        }
        (next, result)
    }

    async fn record(&self, query: &str, result: &QueryResult) {
        let Some(sink) = &self.history else {
            return;
        };
        let entry = HistoryEntry::new(query, &sink.connection_id, &sink.connection_name)
            .with_result(result);
        if let Err(e) = sink.history.add(entry).await {
            tracing::warn!(error = %e, "Failed to record query history");
        }
    }

    fn notify(&self, state: QueryState) {
        let observers: Vec<StateObserver> = lock(&self.observers).clone();
        for observer in observers {
            observer(state);
        }
    }
}

/// Settles an execution whose future is dropped before it finishes, and
/// closes its completion channel either way.
struct ExecutionGuard<'a> {
    executor: &'a QueryExecutor,
    id: Uuid,
    done: Sender<()>,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        if self.executor.abandon(self.id) {
            tracing::debug!(execution = %self.id, "Query dropped before finishing");
            self.executor.notify(QueryState::Cancelled);
        }
        self.done.close();
    }
}

fn failed_result(error: DriverError) -> QueryResult {
    let kind = match error {
        DriverError::NotConnected(_) => QueryErrorKind::NotConnected,
        _ => QueryErrorKind::Backend,
    };
    QueryResult::failed(kind, error.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::traits::{
        ColumnDef, ColumnInfo, ConnectionTest, DriverCapabilities, DriverParams, DriverType,
        QUERY_CANCELLED, Row, TableInfo, Value,
    };
    use async_trait::async_trait;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Driver whose `execute` answers by query text: `slow` sleeps for a
    /// minute, `fail` returns a backend error, `offline` raises NotConnected.
    #[derive(Default)]
    struct MockDriver {
        capabilities: DriverCapabilities,
        cancel_calls: AtomicUsize,
    }

    #[async_trait]
    impl DatabaseDriver for MockDriver {
        fn driver_type(&self) -> DriverType {
            DriverType::Sqlite
        }

        fn capabilities(&self) -> DriverCapabilities {
            self.capabilities
        }

        async fn connect(&self, _params: &DriverParams) -> DriverResult<()> {
            Ok(())
        }

        async fn disconnect(&self) -> DriverResult<()> {
            Ok(())
        }

        async fn is_connected(&self) -> bool {
            true
        }

        async fn test_connection(&self, _params: &DriverParams) -> ConnectionTest {
            ConnectionTest::ok("mock")
        }

        async fn execute(
            &self,
            query: &str,
            _params: Option<&QueryParams>,
            _limit: Option<usize>,
            _offset: usize,
        ) -> DriverResult<QueryResult> {
            match query {
                "slow" => {
                    smol::Timer::after(Duration::from_secs(60)).await;
                    Ok(QueryResult::affected(0))
                }
                "fail" => Ok(QueryResult::failed(QueryErrorKind::Backend, "syntax error")),
                "offline" => Err(DriverError::NotConnected("mock")),
                _ => Ok(QueryResult::new(
                    vec![ColumnInfo::new("value", "str")],
                    vec![Row::new(vec![Value::from(query)])],
                )),
            }
        }

        async fn get_schemas(&self) -> DriverResult<Vec<String>> {
            Ok(vec!["main".to_string()])
        }

        async fn get_tables(&self, _schema: Option<&str>) -> DriverResult<Vec<TableInfo>> {
            Ok(Vec::new())
        }

        async fn get_columns(&self, _table: &str, _schema: Option<&str>) -> DriverResult<Vec<ColumnDef>> {
            Ok(Vec::new())
        }

        async fn explain_query(&self, query: &str) -> DriverResult<String> {
            Ok(format!("PLAN {}", query))
        }

        async fn cancel_query(&self) -> DriverResult<bool> {
            self.cancel_calls.fetch_add(1, Ordering::SeqCst);
            Err(DriverError::Backend("cancel refused".to_string()))
        }

        async fn set_schema(&self, _schema: &str) -> DriverResult<bool> {
            Ok(false)
        }

        fn current_schema(&self) -> Option<String> {
            None
        }
    }

    fn cancellable() -> Arc<MockDriver> {
        Arc::new(MockDriver {
            capabilities: DriverCapabilities {
                supports_cancel: true,
                supports_explain: true,
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn recorded_states(executor: &QueryExecutor) -> Arc<Mutex<Vec<QueryState>>> {
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();
        executor.on_state_change(move |state| sink.lock().unwrap().push(state));
        states
    }

    async fn wait_until_running(executor: &QueryExecutor) {
        while !executor.is_running() {
            smol::Timer::after(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn test_completed_execution() {
        smol::block_on(async {
            let temp = tempfile::tempdir().unwrap();
            let history = Arc::new(QueryHistory::load(temp.path().join("history.json")).await);
            let executor = QueryExecutor::new(Arc::new(MockDriver::default()))
                .with_history(history.clone(), "conn-1", "Local");
            let states = recorded_states(&executor);

            assert_eq!(executor.state(), QueryState::Idle);
            assert!(executor.last_result().is_none());

            let result = executor.execute("  SELECT 1  ", None, None).await;
            assert!(result.is_success());
            assert_eq!(result.row_count, 1);
            assert_eq!(executor.state(), QueryState::Completed);
            assert_eq!(executor.last_result(), Some(result));
            assert_eq!(
                *states.lock().unwrap(),
                vec![QueryState::Running, QueryState::Completed]
            );

            let entries = history.get_entries(None, None, false).await;
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].query, "SELECT 1");
            assert_eq!(entries[0].connection_id, "conn-1");
            assert!(entries[0].success);
        });
    }

    #[test]
    fn test_failed_execution_records_error() {
        smol::block_on(async {
            let temp = tempfile::tempdir().unwrap();
            let history = Arc::new(QueryHistory::load(temp.path().join("history.json")).await);
            let executor = QueryExecutor::new(Arc::new(MockDriver::default()))
                .with_history(history.clone(), "conn-1", "Local");

            let result = executor.execute("fail", None, None).await;
            assert!(!result.is_success());
            assert_eq!(executor.state(), QueryState::Failed);

            let result = executor.execute("offline", None, None).await;
            let error = result.error.unwrap();
            assert_eq!(error.kind, QueryErrorKind::NotConnected);
            assert_eq!(error.message, "Not connected to mock");

            let entries = history.get_entries(None, None, false).await;
            assert_eq!(entries.len(), 2);
            assert_eq!(entries[0].error.as_deref(), Some("Not connected to mock"));
            assert_eq!(entries[1].error.as_deref(), Some("syntax error"));
        });
    }

    #[test]
    fn test_new_execution_supersedes_running_one() {
        smol::block_on(async {
            let temp = tempfile::tempdir().unwrap();
            let history = Arc::new(QueryHistory::load(temp.path().join("history.json")).await);
            let driver = cancellable();
            let executor =
                QueryExecutor::new(driver.clone()).with_history(history.clone(), "c", "conn");
            let states = recorded_states(&executor);

            let first = executor.execute_in_background("slow", None, None, |_| {});
            wait_until_running(&executor).await;

            let second = executor.execute("SELECT 2", None, None).await;
            let first = first.await;

            assert_eq!(first.error_message(), Some(QUERY_CANCELLED));
            assert_eq!(first.error.unwrap().kind, QueryErrorKind::Cancelled);
            assert!(second.is_success());
            assert_eq!(executor.state(), QueryState::Completed);
            assert_eq!(driver.cancel_calls.load(Ordering::SeqCst), 1);
            assert_eq!(
                *states.lock().unwrap(),
                vec![
                    QueryState::Running,
                    QueryState::Cancelling,
                    QueryState::Cancelled,
                    QueryState::Running,
                    QueryState::Completed,
                ]
            );

            let entries = history.get_entries(None, None, false).await;
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].query, "SELECT 2");
        });
    }

    #[test]
    fn test_cancel_without_native_support() {
        smol::block_on(async {
            let driver = Arc::new(MockDriver::default());
            let executor = QueryExecutor::new(driver.clone());
            assert!(!executor.cancel().await);

            let running = executor.execute_in_background("slow", None, None, |_| {});
            wait_until_running(&executor).await;
            assert!(executor.cancel().await);

            let result = running.await;
            assert_eq!(result.error_message(), Some(QUERY_CANCELLED));
            assert_eq!(executor.state(), QueryState::Cancelled);
            assert_eq!(driver.cancel_calls.load(Ordering::SeqCst), 0);
            assert!(!executor.cancel().await);
        });
    }

    #[test]
    fn test_dropped_execution_settles_as_cancelled() {
        smol::block_on(async {
            let executor = QueryExecutor::new(Arc::new(MockDriver::default()));
            let states = recorded_states(&executor);

            assert!(executor.execute("slow", None, None).now_or_never().is_none());
            assert_eq!(executor.state(), QueryState::Cancelled);
            assert_eq!(
                executor.last_result().and_then(|r| r.error).map(|e| e.kind),
                Some(QueryErrorKind::Cancelled)
            );
            assert_eq!(
                *states.lock().unwrap(),
                vec![QueryState::Running, QueryState::Cancelled]
            );

            let next = executor.execute("SELECT 1", None, None).await;
            assert!(next.is_success());
            assert_eq!(executor.state(), QueryState::Completed);
        });
    }

    #[test]
    fn test_cancelled_background_task_frees_executor() {
        smol::block_on(async {
            let executor = QueryExecutor::new(cancellable());
            let task = executor.execute_in_background("slow", None, None, |_| {});
            wait_until_running(&executor).await;

            assert!(task.cancel().await.is_none());
            assert_eq!(executor.state(), QueryState::Cancelled);
            assert!(!executor.cancel().await);

            let next = smol::future::or(
                async { Some(executor.execute("SELECT 1", None, None).await) },
                async {
                    smol::Timer::after(Duration::from_secs(5)).await;
                    None
                },
            )
            .await
            .expect("executor stayed busy after the task was dropped");
            assert!(next.is_success());
        });
    }

    #[test]
    fn test_background_completion_callback() {
        smol::block_on(async {
            let executor = QueryExecutor::new(Arc::new(MockDriver::default()));
            let (tx, rx) = async_channel::bounded(1);
            let task = executor.execute_in_background("SELECT 3", None, Some(10), move |result| {
                let _ = tx.try_send(result.row_count);
            });

            assert_eq!(rx.recv().await.unwrap(), 1);
            assert!(task.await.is_success());
        });
    }

    #[test]
    fn test_explain_gated_on_capability() {
        smol::block_on(async {
            let plain = QueryExecutor::new(Arc::new(MockDriver::default()));
            assert_eq!(plain.explain("SELECT 1").await.unwrap(), EXPLAIN_NOT_SUPPORTED);

            let explaining = QueryExecutor::new(cancellable());
            assert_eq!(explaining.explain("SELECT 1").await.unwrap(), "PLAN SELECT 1");
        });
    }
}
