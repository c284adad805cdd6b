//! Diagnostic tracing for hostrun itself.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics on stderr, filtered by `RUST_LOG`
//!   or `-v` flags. Not persisted, not part of a run's product output.
//!
//! - **Host logs (`io/host_log`)**: per-host artifacts under `<home>/logs/`.
//!   Always written, unaffected by tracing filters.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directive used when `RUST_LOG` is unset.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "hostrun=info,warn",
        2 => "hostrun=debug,info",
        _ => "trace",
    }
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins over `verbosity` when set.
///
/// # Example
/// ```bash
/// RUST_LOG=hostrun=debug hostrun run lab
/// hostrun -vv run lab
/// ```
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_names(verbosity >= 2)
                .compact(),
        )
        .init();
}
