//! Log setup for the `shipwright` binary.
//!
//! stdout belongs to the usage text and the run report (human or `--json`),
//! so every log line goes to stderr. `RUST_LOG` overrides the verbosity picked
//! on the command line.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter from `RUST_LOG`, or `level` when it is unset or unparsable.
fn log_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the global stderr subscriber. Only the first call in a process
/// takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let json_layer = json.then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .json()
    });
    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(log_filter(level))
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .ok();
}
