use clap::{Arg, Command};

pub const ARG_ACCESS_SECRET: &str = "access-token-secret";
pub const ARG_REFRESH_SECRET: &str = "refresh-token-secret";
pub const ARG_EMAIL_SECRET: &str = "email-token-secret";

/// The three signing secrets are deliberately separate arguments: compromise
/// of one must not allow forging tokens of another kind.
#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACCESS_SECRET)
                .long(ARG_ACCESS_SECRET)
                .help("HS256 secret for access tokens")
                .env("MASUK_ACCESS_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_REFRESH_SECRET)
                .long(ARG_REFRESH_SECRET)
                .help("HS256 secret for refresh tokens")
                .env("MASUK_REFRESH_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_EMAIL_SECRET)
                .long(ARG_EMAIL_SECRET)
                .help("HS256 secret for email verification tokens")
                .env("MASUK_EMAIL_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
}
