//! Driver abstraction traits and types.
//!
//! This module provides a unified interface over every supported backend.
//! It defines:
//!
//! - **Types** (`types`): Driver type enum, SSL modes, connection fields and params
//! - **Row/Value** (`row`): Backend-agnostic value representation
//! - **Connection** (`connection`): The `DatabaseDriver` trait and query results
//! - **Schema** (`schema`): Introspection value objects
//!
//! # Example
//!
//! ```ignore
//! use dbview::services::database::drivers::DriverRegistry;
//! use dbview::services::database::traits::{DriverParams, DriverType};
//!
//! let registry = DriverRegistry::with_builtin();
//! let driver = registry.create(DriverType::Sqlite)?;
//! driver.connect(&DriverParams::new().with("database", "/tmp/app.db")).await?;
//! let tables = driver.get_tables(None).await?;
//! ```

pub mod connection;
pub mod row;
pub mod schema;
pub mod types;

pub use connection::{
    BoxedDriver, ConnectionTest, DatabaseDriver, DriverCapabilities, EXPLAIN_NOT_SUPPORTED,
    QUERY_CANCELLED, QueryError, QueryErrorKind, QueryResult,
};

pub use row::{ColumnInfo, Row, Value};

pub use schema::{ColumnDef, ForeignKeyInfo, IndexInfo, TableInfo};

pub use types::{ConnectionField, DriverParams, DriverType, FieldType, QueryParams, SslMode};
