pub mod actions;
pub mod commands;
pub mod dispatch;
pub mod telemetry;

use crate::cli::actions::Action;
use anyhow::Result;

/// Maps `-v` repetitions to a tracing level. Without the flag logging
/// stays off and `RUST_LOG` keeps full control.
const fn verbosity(count: u8) -> Option<tracing::Level> {
    match count {
        0 => None,
        1 => Some(tracing::Level::INFO),
        2 => Some(tracing::Level::DEBUG),
        _ => Some(tracing::Level::TRACE),
    }
}

/// Parses the command line, initializes telemetry and returns the
/// action to run.
///
/// # Errors
///
/// Fails when telemetry initialization or argument handling fails.
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();
    telemetry::init(verbosity(matches.get_count("verbose")))?;
    dispatch::handler(&matches)
}
