//! Tracing setup for hosts embedding flowsync.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`. Returns `false` when a
/// subscriber was already installed.
pub fn init_tracing(default_filter: &str, json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.is_ok()
}
