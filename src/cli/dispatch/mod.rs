//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the
//! appropriate action, such as starting the API server with its full
//! configuration state.

use anyhow::{Context, Result};
use secrecy::SecretString;

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{email, tokens};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    crate::cli::commands::validate(matches).map_err(|e| anyhow::anyhow!(e))?;

    let access_secret = secret_arg(matches, tokens::ARG_ACCESS_SECRET)?;
    let refresh_secret = secret_arg(matches, tokens::ARG_REFRESH_SECRET)?;
    let email_secret = secret_arg(matches, tokens::ARG_EMAIL_SECRET)?;

    let email_api_key = matches
        .get_one::<String>(email::ARG_EMAIL_API_KEY)
        .map(|key| SecretString::from(key.clone()));

    Ok(Action::Server(Args {
        port,
        dsn,
        production: matches.get_flag("production"),
        frontend_base_url: string_arg(matches, "frontend-base-url")?,
        access_secret,
        refresh_secret,
        email_secret,
        access_token_ttl_seconds: i64_arg(matches, "access-token-ttl-seconds")?,
        refresh_token_ttl_seconds: i64_arg(matches, "refresh-token-ttl-seconds")?,
        email_token_ttl_seconds: i64_arg(matches, "email-token-ttl-seconds")?,
        reset_token_ttl_seconds: i64_arg(matches, "reset-token-ttl-seconds")?,
        auth_rate_limit_max: matches
            .get_one::<u32>("auth-rate-limit-max")
            .copied()
            .unwrap_or(20),
        auth_rate_limit_window_seconds: matches
            .get_one::<u64>("auth-rate-limit-window-seconds")
            .copied()
            .unwrap_or(900),
        email_endpoint: matches.get_one::<String>(email::ARG_EMAIL_ENDPOINT).cloned(),
        email_api_key,
        email_from: string_arg(matches, email::ARG_EMAIL_FROM)?,
    }))
}

fn string_arg(matches: &clap::ArgMatches, name: &str) -> Result<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .with_context(|| format!("missing required argument: --{name}"))
}

fn secret_arg(matches: &clap::ArgMatches, name: &str) -> Result<SecretString> {
    Ok(SecretString::from(string_arg(matches, name)?))
}

fn i64_arg(matches: &clap::ArgMatches, name: &str) -> Result<i64> {
    matches
        .get_one::<i64>(name)
        .copied()
        .with_context(|| format!("missing required argument: --{name}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn base_args() -> Vec<&'static str> {
        vec![
            "masuk",
            "--dsn",
            "postgres://user@localhost:5432/masuk",
            "--access-token-secret",
            "access",
            "--refresh-token-secret",
            "refresh",
            "--email-token-secret",
            "email",
        ]
    }

    #[test]
    fn server_action_from_args() -> Result<()> {
        let command = crate::cli::commands::new();
        let matches = command.get_matches_from(base_args());
        let Action::Server(args) = handler(&matches)?;

        assert_eq!(args.port, 8080);
        assert_eq!(args.dsn, "postgres://user@localhost:5432/masuk");
        assert!(!args.production);
        assert_eq!(args.access_secret.expose_secret(), "access");
        assert_eq!(args.access_token_ttl_seconds, 900);
        assert_eq!(args.refresh_token_ttl_seconds, 604_800);
        assert_eq!(args.email_token_ttl_seconds, 3600);
        assert_eq!(args.reset_token_ttl_seconds, 900);
        assert_eq!(args.auth_rate_limit_max, 20);
        assert_eq!(args.auth_rate_limit_window_seconds, 900);
        assert!(args.email_endpoint.is_none());
        assert_eq!(args.email_from, "no-reply@masuk.dev");
        Ok(())
    }

    #[test]
    fn email_endpoint_without_key_rejected() {
        temp_env::with_vars([("MASUK_EMAIL_API_KEY", None::<&str>)], || {
            let command = crate::cli::commands::new();
            let mut args = base_args();
            args.extend(["--email-endpoint", "https://api.mailer.test/send"]);
            let matches = command.get_matches_from(args);
            let result = handler(&matches);
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(err.to_string().contains("--email-api-key"));
            }
        });
    }
}
