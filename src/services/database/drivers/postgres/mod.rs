//! PostgreSQL database driver implementation.
//!
//! This module provides a PostgreSQL driver that implements the `DatabaseDriver`
//! trait using SQLx.
//!
//! # Example
//!
//! ```ignore
//! use dbview::services::database::drivers::postgres::PostgresDriver;
//! use dbview::services::database::traits::{DatabaseDriver, DriverParams};
//!
//! let params = DriverParams::new()
//!     .with("host", "localhost")
//!     .with("port", 5432)
//!     .with("database", "mydb")
//!     .with("username", "user")
//!     .with("password", "password")
//!     .with("ssl_mode", "prefer");
//!
//! let driver = PostgresDriver::new();
//! driver.connect(&params).await?;
//! driver.set_schema("reporting").await?;
//! ```

mod connection;
mod schema;
mod types;

pub use connection::PostgresDriver;
pub use types::PgValueConverter;
