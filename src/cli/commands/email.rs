use clap::{Arg, Command};

pub const ARG_EMAIL_ENDPOINT: &str = "email-endpoint";
pub const ARG_EMAIL_API_KEY: &str = "email-api-key";
pub const ARG_EMAIL_FROM: &str = "email-from";

/// Without an endpoint the server falls back to the log-only sender, which
/// is the intended local-dev behavior.
#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_EMAIL_ENDPOINT)
                .long(ARG_EMAIL_ENDPOINT)
                .help("HTTP endpoint of the email delivery API")
                .env("MASUK_EMAIL_ENDPOINT"),
        )
        .arg(
            Arg::new(ARG_EMAIL_API_KEY)
                .long(ARG_EMAIL_API_KEY)
                .help("API key for the email delivery API")
                .env("MASUK_EMAIL_API_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_EMAIL_FROM)
                .long(ARG_EMAIL_FROM)
                .help("From address for outbound mail")
                .env("MASUK_EMAIL_FROM")
                .default_value("no-reply@masuk.dev"),
        )
}
