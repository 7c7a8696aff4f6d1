//! Amazon DynamoDB driver implementation.
//!
//! Queries are PartiQL statements or bare table names (scanned). The connection
//! region is reported as the only schema.
//!
//! # Example
//!
//! ```ignore
//! use dbview::services::database::drivers::dynamodb::DynamoDbDriver;
//! use dbview::services::database::traits::{DatabaseDriver, DriverParams};
//!
//! let driver = DynamoDbDriver::new();
//! driver
//!     .connect(&DriverParams::new().with("region", "eu-west-1").with("endpoint", "http://localhost:8000"))
//!     .await?;
//! let orders = driver.execute("SELECT * FROM \"orders\" WHERE pk = ?", Some(&params), None, 0).await?;
//! let sample = driver.execute("orders", None, Some(25), 0).await?;
//! ```

mod connection;
mod schema;
mod types;

pub use connection::DynamoDbDriver;
pub use types::DynamoValueConverter;
