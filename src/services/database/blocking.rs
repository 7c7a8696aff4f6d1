//! Worker-thread offload for synchronous client libraries.
//!
//! Drivers whose client is blocking (Redis, the AWS SDK bridged from its own
//! runtime, the OS keyring) never call it inline from async code. They hand the
//! closure to a `BlockingExecutor`, which runs it on smol's blocking thread pool
//! and resolves once the worker finishes.

use std::sync::Arc;

/// Handle for running blocking work off the async executor.
#[derive(Debug, Clone)]
pub struct BlockingExecutor {
    label: &'static str,
}

impl BlockingExecutor {
    /// `label` names the owning driver in trace output.
    pub fn new(label: &'static str) -> Self {
        Self { label }
    }

    /// Run `f` on a worker thread and await its result.
    pub async fn run<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        tracing::trace!(target: "dbview::blocking", driver = self.label, "offloading call");
        smol::unblock(f).await
    }

    /// Run `f` with a shared handle to `state`.
    pub async fn run_with<S, F, T>(&self, state: &Arc<S>, f: F) -> T
    where
        S: Send + Sync + ?Sized + 'static,
        F: FnOnce(&S) -> T + Send + 'static,
        T: Send + 'static,
    {
        let state = Arc::clone(state);
        self.run(move || f(&state)).await
    }
}
