//! Diagnostic tracing for the search.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted, not part of the run's product output.
//!
//! - **Run artifacts (`io/artifacts`)**: `run_log.json`, `metrics.json` and
//!   the patches under `<workdir>/artifacts/`. Always written, unaffected by
//!   `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn`, or `retrospec=info` when `verbose`
/// is set. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=retrospec=debug retrospec run --repo . --commit HEAD
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "retrospec=info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
