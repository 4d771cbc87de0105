//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize tracing for the process.
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` for this crate
/// with `verbose`. Subsequent calls are no-ops.
pub fn init(verbose: bool) {
    let default = if verbose { "info,watchpool=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}
