//! Core of a multi-backend database browser.
//!
//! One driver contract over SQLite, PostgreSQL, MySQL/MariaDB, DynamoDB and
//! Redis, plus saved connection profiles, a cancellable query executor with
//! history, and result export.
//!
//! ```ignore
//! use std::sync::Arc;
//! use dbview::config::AppPaths;
//! use dbview::services::{ConnectionManager, DriverRegistry, QueryExecutor, QueryHistory};
//! use dbview::services::storage::default_credential_store;
//!
//! let paths = AppPaths::resolve()?;
//! let connections =
//!     ConnectionManager::load(paths.connections_file(), default_credential_store().into()).await;
//! let history = Arc::new(QueryHistory::load(paths.history_file()).await);
//!
//! let profile = connections.list().await.remove(0);
//! let params = connections.get_connection_config(&profile.id).await?.unwrap_or_default();
//! let driver = DriverRegistry::with_builtin().create(profile.driver_type)?;
//! driver.connect(&params).await?;
//!
//! let executor = QueryExecutor::new(driver.into()).with_history(history, &profile.id, &profile.name);
//! let result = executor.execute("SELECT 1", None, Some(100)).await;
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod services;

pub use error::{DriverError, DriverResult};
