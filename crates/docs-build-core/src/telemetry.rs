//! Log output of the `docs-build` binary.
//!
//! Everything is written to stderr; stdout carries diagnostics and command
//! results. The build tool's own output reaches the log through
//! `BuildProgress` events at debug level, so `--verbose` shows it.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the process-wide subscriber.
///
/// `RUST_LOG` wins over `level` when set. With `json`, every record is one
/// JSON object per line. A second call keeps the first subscriber.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let output = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json {
        registry.with(output.json()).try_init()
    } else {
        registry.with(output).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing already initialised; keeping the existing subscriber");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_keeps_first_subscriber() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
