//! Diagnostics go to stderr through `tracing`; stdout carries command output.

use anyhow::{anyhow, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "data_harness=warn",
        1 => "data_harness=info",
        2 => "data_harness=debug",
        _ => "trace",
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `-v`.
pub fn init(verbosity: u8) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init()
        .map_err(|e| anyhow!("failed to initialize logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_the_level() {
        assert_eq!(default_directive(0), "data_harness=warn");
        assert_eq!(default_directive(2), "data_harness=debug");
        assert_eq!(default_directive(9), "trace");
    }
}
