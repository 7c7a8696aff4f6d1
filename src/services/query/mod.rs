//! Query execution engine.
//!
//! `QueryExecutor` wraps one connected driver with a small state machine
//! (see `QueryState`), cancellation of in-flight work and history recording.

mod executor;
mod state;

pub use executor::QueryExecutor;
pub use state::{QueryExecution, QueryState};
