//! Tracing setup for the `pipegen` binary.
//!
//! Everything goes to stderr; stdout stays reserved for descriptors and
//! reports.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Pipegen crates log at `level`; dependencies only at warn and above.
fn default_filter(level: Level) -> EnvFilter {
    let level = level.as_str().to_ascii_lowercase();
    EnvFilter::new(format!(
        "warn,pipegen_core={level},pipegen_artifacts={level},pipegen_ci={level},pipegen={level}"
    ))
}

/// Install the global subscriber. `RUST_LOG` replaces the default filter.
///
/// Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));
    let base = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let layer = if json {
        base.json().boxed()
    } else {
        base.boxed()
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .ok();
}
