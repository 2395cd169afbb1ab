use crate::cli::{actions::Action, commands, dispatch, telemetry};
use anyhow::Result;
use tracing::Level;

/// Silence is the default; each `-v` unlocks one more level.
fn verbosity_to_level(count: u8) -> Option<Level> {
    const LEVELS: [Level; 4] = [Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE];
    match count {
        0 => None,
        n => Some(LEVELS[usize::from(n.min(4)) - 1]),
    }
}

/// Parse arguments, initialize telemetry, and resolve the action to run.
///
/// # Errors
/// Returns an error if telemetry initialization or dispatch fails.
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();

    let level = verbosity_to_level(
        matches
            .get_one::<u8>(commands::logging::ARG_VERBOSITY)
            .copied()
            .unwrap_or_default(),
    );
    telemetry::init(level)?;

    dispatch::handler(&matches)
}
