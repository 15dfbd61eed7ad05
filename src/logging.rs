//! Test logging setup.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber that writes through the test harness's captured
/// output. The filter comes from `RUST_LOG`, defaulting to `warn`.
///
/// Safe to call from every test; only the first call in a process installs
/// anything.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_thread_names(true)
        .try_init();
}
