//! Tracing initialisation helpers for tests.
//!
//! Call [`init_test_tracing`] at the top of any test that emits tracing events
//! and wants them captured by the test harness. The subscriber is installed
//! at most once per process.

use tracing_subscriber::EnvFilter;

/// Install a subscriber that writes to the test-harness writer.
///
/// `RUST_LOG` wins when set; otherwise the ibbcheck crates log at `debug`
/// and everything else at `warn`.
///
/// # Example
///
/// ```ignore
/// #[tokio::test]
/// async fn my_test() {
///     ibbcheck_test_utils::tracing_setup::init_test_tracing();
///     tracing::info!("visible with --nocapture");
/// }
/// ```
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "warn,ibbcheck_core=debug,ibbcheck_loopback=debug,ibbcheck_config=debug",
            )
        }))
        .with_test_writer()
        .try_init();
}
