//! Development-time tracing for the grader.
//!
//! Diagnostics go to stderr so stdout stays reserved for the JSON report.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used by the `grader` binary when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVES: &str = "warn";

/// Initialize the grader's tracing subscriber.
///
/// # Example
/// ```bash
/// RUST_LOG=grader=debug cargo run -p grader -- evaluate ./submission
/// ```
pub fn init() {
    init_with_default(DEFAULT_DIRECTIVES);
}

/// Install a compact stderr subscriber filtered by `RUST_LOG`, falling back to
/// `directives`. A second call is a no-op.
pub fn init_with_default(directives: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init()
        .ok();
}
