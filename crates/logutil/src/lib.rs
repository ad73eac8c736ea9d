//! Utilities for logging.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Configure logging for tests.
///
/// Output is captured by the test harness. Safe to call from every test.
pub fn init_test() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::TRACE.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .try_init();
}
