use tracing_subscriber::EnvFilter;

use crate::model::FixOptions;

/// Default filter when `RUST_LOG` is not set.
pub fn default_directive(options: &FixOptions) -> &'static str {
    if options.quiet {
        "warn"
    } else {
        "info"
    }
}

/// Installs a global fmt subscriber. `RUST_LOG` overrides the level picked
/// from `options`.
///
/// Returns `false` when a subscriber was already installed, which is fine for
/// hosts that configure tracing themselves.
pub fn init_tracing(options: &FixOptions) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(options)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
