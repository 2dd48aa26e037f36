//! Tracing setup, shared by every subcommand.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber. `verbose` raises the
/// default filter to `debug` when `RUST_LOG` isn't set.
pub fn init(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
