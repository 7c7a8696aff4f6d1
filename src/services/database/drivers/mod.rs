//! Database driver implementations.
//!
//! This module contains driver implementations for each supported backend:
//!
//! - **SQLite**: Embedded SQLite support via SQLx
//! - **PostgreSQL**: PostgreSQL support via SQLx, with server-side cancel
//! - **MySQL**: MySQL/MariaDB support via SQLx
//! - **DynamoDB**: PartiQL and table scans via the AWS SDK
//! - **Redis**: Command execution and key-prefix browsing via redis-rs
//!
//! Each driver implements the `DatabaseDriver` trait. Use `DriverRegistry` to
//! create them by `DriverType`.

pub(crate) mod common;
mod registry;

pub mod dynamodb;
pub mod mysql;
pub mod postgres;
pub mod redis;
pub mod sqlite;

pub use registry::{DriverDescriptor, DriverRegistry};
