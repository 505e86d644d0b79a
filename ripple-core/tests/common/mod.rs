//! Shared helpers for integration tests.

use tracing_subscriber::EnvFilter;

/// Route runtime logs to the test harness. Filter with `RUST_LOG`,
/// e.g. `RUST_LOG=ripple_core=trace`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
