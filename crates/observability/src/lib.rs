//! Process-wide tracing setup.

use tracing_subscriber::EnvFilter;

/// Initialize structured JSON logging, filtered via `RUST_LOG` (defaulting
/// to `info`). Safe to call more than once; later calls are no-ops.
pub fn init() {
    init_with_default_filter("info");
}

/// Same as [`init`] but with an explicit fallback filter, for embedders that
/// want a different noise floor than `info`.
pub fn init_with_default_filter(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Plain, human-readable output for tests and local experiments.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .compact()
        .try_init();
}
