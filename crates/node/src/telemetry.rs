//! Tracing subscriber setup for the binary.

use tracing_subscriber::EnvFilter;

/// Filter for a `-v` count. `RUST_LOG`, when set, wins.
pub fn filter_for(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        })
    })
}

/// Install the global subscriber. Call once, before any service runs.
pub fn init(json: bool, verbosity: u8) {
    let filter = filter_for(verbosity);
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}
