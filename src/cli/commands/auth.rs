use clap::{Arg, Command};

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL used for verification and reset links")
                .env("MASUK_FRONTEND_BASE_URL")
                .default_value("https://masuk.dev"),
        )
        .arg(
            Arg::new("access-token-ttl-seconds")
                .long("access-token-ttl-seconds")
                .help("Access token and cookie TTL in seconds")
                .env("MASUK_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("refresh-token-ttl-seconds")
                .long("refresh-token-ttl-seconds")
                .help("Refresh token and cookie TTL in seconds")
                .env("MASUK_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("email-token-ttl-seconds")
                .long("email-token-ttl-seconds")
                .help("Email verification token TTL in seconds")
                .env("MASUK_EMAIL_TOKEN_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("reset-token-ttl-seconds")
                .long("reset-token-ttl-seconds")
                .help("Password reset token TTL in seconds")
                .env("MASUK_RESET_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("auth-rate-limit-max")
                .long("auth-rate-limit-max")
                .help("Requests allowed per address per window on auth endpoints (0 disables)")
                .env("MASUK_AUTH_RATE_LIMIT_MAX")
                .default_value("20")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("auth-rate-limit-window-seconds")
                .long("auth-rate-limit-window-seconds")
                .help("Rate limit window in seconds for auth endpoints")
                .env("MASUK_AUTH_RATE_LIMIT_WINDOW_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
}
