/// Initializes the tracing/logging infrastructure for a host application.
///
/// Structured logging via the `tracing` crate with:
/// - **Environment-based filtering**: controlled via the `RUST_LOG`
///   environment variable
/// - **Pretty formatting**: human-readable output with timestamps and levels
///
/// # Environment Variables
///
/// Set `RUST_LOG` to control verbosity:
/// - `RUST_LOG=info` - worker/registry lifecycle
/// - `RUST_LOG=debug` - per-request commit/rollback and flush activity
/// - `RUST_LOG=rowgate=debug` - debug only for this crate
///
/// # Example
///
/// ```ignore
/// setup_tracing();
/// tracing::info!("application started");
/// ```
pub fn setup_tracing() {
    // Idempotent so host test suites can call it from every test.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
