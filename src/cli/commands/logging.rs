use clap::{Arg, ArgAction, Command, builder::ValueParser};

pub const ARG_VERBOSITY: &str = "verbosity";

/// Parses the verbosity argument: named levels come from the environment
/// (`MASUK_LOG_LEVEL=debug`), repeat counts from the flag (`-vvv`).
#[must_use]
pub fn level_parser() -> ValueParser {
    ValueParser::from(|level: &str| -> Result<u8, String> {
        match level.to_ascii_lowercase().as_str() {
            "error" => return Ok(0),
            "warn" => return Ok(1),
            "info" => return Ok(2),
            "debug" => return Ok(3),
            "trace" => return Ok(4),
            _ => {}
        }
        level
            .parse::<u8>()
            .ok()
            .filter(|count| *count <= 5)
            .ok_or_else(|| format!("invalid log level: {level}"))
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Log verbosity; repeat for more detail (error, warn, info, debug, trace)")
            .env("MASUK_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(level_parser()),
    )
}
