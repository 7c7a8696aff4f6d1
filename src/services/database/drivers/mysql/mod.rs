//! MySQL / MariaDB database driver implementation.
//!
//! This module provides a MySQL driver that implements the `DatabaseDriver`
//! trait using SQLx. MySQL databases are exposed as schemas.
//!
//! # Example
//!
//! ```ignore
//! use dbview::services::database::drivers::mysql::MySqlDriver;
//! use dbview::services::database::traits::{DatabaseDriver, DriverParams, QueryParams, Value};
//!
//! let driver = MySqlDriver::new();
//! driver
//!     .connect(&DriverParams::new().with("host", "localhost").with("database", "shop"))
//!     .await?;
//!
//! let params = QueryParams::Positional(vec![Value::Int(42)]);
//! let result = driver
//!     .execute("SELECT * FROM orders WHERE id = %s", Some(&params), None, 0)
//!     .await?;
//! ```

mod connection;
mod schema;
mod types;

pub use connection::MySqlDriver;
pub use types::MySqlValueConverter;
