//! SQLite database driver implementation.
//!
//! This module provides a SQLite driver that implements the `DatabaseDriver`
//! trait using SQLx.
//!
//! SQLite is a file-based embedded database; the driver only opens files that
//! already exist and never creates one.
//!
//! # Example
//!
//! ```ignore
//! use dbview::services::database::drivers::sqlite::SqliteDriver;
//! use dbview::services::database::traits::{DatabaseDriver, DriverParams};
//!
//! let driver = SqliteDriver::new();
//! driver
//!     .connect(&DriverParams::new().with("database", "/path/to/database.db"))
//!     .await?;
//! let tables = driver.get_tables(None).await?;
//! ```

mod connection;
mod schema;
mod types;

pub use connection::SqliteDriver;
pub use types::SqliteValueConverter;
