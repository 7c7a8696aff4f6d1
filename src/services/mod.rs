pub mod database;
pub mod export;
pub mod query;
pub mod storage;

pub use database::{BlockingExecutor, DriverDescriptor, DriverRegistry};
pub use export::{ExportFormat, ExportOptions, ResultExporter};
pub use query::{QueryExecution, QueryExecutor, QueryState};
pub use storage::{
    ConnectionConfig, ConnectionManager, CredentialStore, HistoryEntry, MemoryCredentialStore,
    QueryHistory,
};
