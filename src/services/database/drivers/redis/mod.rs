//! Redis database driver implementation.
//!
//! Queries are single command lines (`HGETALL user:1`, `SCAN 0 session:* 50`).
//! Well-known commands are shaped into tables; anything else is sent through
//! and its reply rendered as best it can be.
//!
//! # Example
//!
//! ```ignore
//! use dbview::services::database::drivers::redis::RedisDriver;
//! use dbview::services::database::traits::{DatabaseDriver, DriverParams};
//!
//! let driver = RedisDriver::new();
//! driver.connect(&DriverParams::new().with("host", "localhost")).await?;
//! let result = driver.execute("GET greeting", None, None, 0).await?;
//! assert_eq!(result.columns[0].name, "value");
//! ```

mod commands;
mod connection;
mod schema;
#[cfg(test)]
mod scripted;

pub use commands::{RedisCommand, RedisReply, format_reply, parse_command};
pub use connection::RedisDriver;
