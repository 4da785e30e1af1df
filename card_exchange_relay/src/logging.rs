// Console logging for the relay binary.
//
// Library code only emits `tracing` events; installing a subscriber is the
// binary's job. The filter defaults to `info` and can be overridden with
// `RUST_LOG` (e.g. `RUST_LOG=card_exchange_relay=debug` to see every report
// and match).

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber: compact single-line output to stdout.
///
/// Call once, before `start_relay`. Panics if a global subscriber is already
/// set.
pub fn init_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}
