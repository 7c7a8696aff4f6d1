//! Driver registry for creating database drivers.
//!
//! The registry maps each `DriverType` to a descriptor holding its static
//! metadata (display name, default port, capabilities, connection fields) and
//! a constructor. It is an ordinary value: build one with `with_builtin()` and
//! hand it to whatever needs to create drivers.

use std::collections::HashMap;

use anyhow::{Result, anyhow};

use super::dynamodb::DynamoDbDriver;
use super::mysql::MySqlDriver;
use super::postgres::PostgresDriver;
use super::redis::RedisDriver;
use super::sqlite::SqliteDriver;
use crate::services::database::traits::{
    BoxedDriver, ConnectionField, DriverCapabilities, DriverType,
};

/// Static description of a driver plus its constructor.
#[derive(Debug, Clone)]
pub struct DriverDescriptor {
    pub driver_type: DriverType,
    pub display_name: &'static str,
    pub default_port: u16,
    pub capabilities: DriverCapabilities,
    connection_fields: fn() -> Vec<ConnectionField>,
    constructor: fn() -> BoxedDriver,
}

impl DriverDescriptor {
    pub fn new(
        driver_type: DriverType,
        capabilities: DriverCapabilities,
        connection_fields: fn() -> Vec<ConnectionField>,
        constructor: fn() -> BoxedDriver,
    ) -> Self {
        Self {
            driver_type,
            display_name: driver_type.display_name(),
            default_port: driver_type.default_port(),
            capabilities,
            connection_fields,
            constructor,
        }
    }

    /// The inputs a connection editor should ask for.
    pub fn connection_fields(&self) -> Vec<ConnectionField> {
        (self.connection_fields)()
    }

    /// Create a fresh, unconnected driver.
    pub fn create(&self) -> BoxedDriver {
        (self.constructor)()
    }
}

/// Registry of available drivers keyed by type.
///
/// # Example
///
/// ```ignore
/// use dbview::services::database::drivers::DriverRegistry;
/// use dbview::services::database::traits::{DriverParams, DriverType};
///
/// let registry = DriverRegistry::with_builtin();
/// let driver = registry.create(DriverType::PostgreSQL)?;
/// driver.connect(&params).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<DriverType, DriverDescriptor>,
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every driver this crate ships.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for driver_type in DriverType::all() {
            registry.register(Self::builtin(driver_type));
        }
        registry
    }

    fn builtin(driver_type: DriverType) -> DriverDescriptor {
        match driver_type {
            DriverType::Sqlite => DriverDescriptor::new(
                driver_type,
                SqliteDriver::capabilities(),
                SqliteDriver::connection_fields,
                SqliteDriver::boxed,
            ),
            DriverType::PostgreSQL => DriverDescriptor::new(
                driver_type,
                PostgresDriver::capabilities(),
                PostgresDriver::connection_fields,
                PostgresDriver::boxed,
            ),
            DriverType::MySQL => DriverDescriptor::new(
                driver_type,
                MySqlDriver::capabilities(),
                MySqlDriver::connection_fields,
                MySqlDriver::boxed,
            ),
            DriverType::DynamoDB => DriverDescriptor::new(
                driver_type,
                DynamoDbDriver::capabilities(),
                DynamoDbDriver::connection_fields,
                DynamoDbDriver::boxed,
            ),
            DriverType::Redis => DriverDescriptor::new(
                driver_type,
                RedisDriver::capabilities(),
                RedisDriver::connection_fields,
                RedisDriver::boxed,
            ),
        }
    }

    /// Add or replace a descriptor; returns the one it replaced.
    pub fn register(&mut self, descriptor: DriverDescriptor) -> Option<DriverDescriptor> {
        tracing::debug!(driver = %descriptor.driver_type, "Registering driver");
        self.drivers.insert(descriptor.driver_type, descriptor)
    }

    pub fn get(&self, driver_type: DriverType) -> Option<&DriverDescriptor> {
        self.drivers.get(&driver_type)
    }

    /// Create a new driver of the given type.
    ///
    /// # Errors
    ///
    /// Returns an error if no driver is registered for `driver_type`.
    pub fn create(&self, driver_type: DriverType) -> Result<BoxedDriver> {
        self.get(driver_type)
            .map(DriverDescriptor::create)
            .ok_or_else(|| anyhow!("No driver registered for {}", driver_type))
    }

    /// Registered drivers in display order.
    pub fn available(&self) -> Vec<&DriverDescriptor> {
        DriverType::all()
            .into_iter()
            .filter_map(|driver_type| self.get(driver_type))
            .collect()
    }
}
