//! Structured logging setup.
//!
//! Library code only emits `tracing` events; embedding applications call
//! `init_logging` once to install a console subscriber. The filter comes from
//! `DBVIEW_LOG`, then `RUST_LOG`, then a build-dependent default.

use tracing_subscriber::EnvFilter;

/// Environment variable holding a crate-specific filter.
pub const LOG_ENV: &str = "DBVIEW_LOG";

/// Default filter based on build type.
pub fn default_log_filter() -> &'static str {
    #[cfg(debug_assertions)]
    {
        "debug,dbview=trace,sqlx=warn,hyper=warn,aws_config=warn,aws_smithy_runtime=warn"
    }
    #[cfg(not(debug_assertions))]
    {
        "info,dbview=info,sqlx=warn,hyper=warn,aws_config=warn,aws_smithy_runtime=warn"
    }
}

/// Build the filter. Priority: custom filter > DBVIEW_LOG > RUST_LOG > default.
pub fn build_env_filter(custom_filter: Option<&str>) -> EnvFilter {
    if let Some(filter) = custom_filter {
        return EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(default_log_filter()));
    }

    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter()))
}

/// Install a stdout subscriber.
///
/// Returns `false` when a global subscriber was already installed, which
/// leaves the existing one in place.
pub fn init_logging(custom_filter: Option<&str>) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(custom_filter))
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
        .is_ok()
}
