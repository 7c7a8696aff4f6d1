//! Database access layer.
//!
//! - `traits`: the driver contract and the value types every backend shares
//! - `drivers`: the concrete backends and the `DriverRegistry`
//! - `blocking`: offload for synchronous client libraries
//! - `params`: placeholder translation for bound query parameters

pub mod blocking;
pub mod drivers;
pub mod params;
pub mod traits;

pub use blocking::BlockingExecutor;
pub use drivers::{DriverDescriptor, DriverRegistry};
