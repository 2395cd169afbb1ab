use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};

use crate::api;
use crate::api::email::{EmailSender, HttpEmailSender, LogEmailSender};
use crate::api::handlers::auth::{
    AuthConfig, AuthState, FixedWindowLimiter, NoopRateLimiter, RateLimiter,
};
use crate::token::Keys;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub production: bool,
    pub frontend_base_url: String,
    pub access_secret: SecretString,
    pub refresh_secret: SecretString,
    pub email_secret: SecretString,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub email_token_ttl_seconds: i64,
    pub reset_token_ttl_seconds: i64,
    pub auth_rate_limit_max: u32,
    pub auth_rate_limit_window_seconds: u64,
    pub email_endpoint: Option<String>,
    pub email_api_key: Option<SecretString>,
    pub email_from: String,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if the email sender cannot be constructed or the server
/// fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let keys = Keys::new(&args.access_secret, &args.refresh_secret, &args.email_secret)
        .with_access_ttl_seconds(args.access_token_ttl_seconds)
        .with_refresh_ttl_seconds(args.refresh_token_ttl_seconds)
        .with_email_ttl_seconds(args.email_token_ttl_seconds);

    let config = AuthConfig::new(args.frontend_base_url)
        .with_production(args.production)
        .with_reset_token_ttl_seconds(args.reset_token_ttl_seconds);

    // Without a configured endpoint, mail is logged instead of delivered.
    let email: Arc<dyn EmailSender> = match (args.email_endpoint, args.email_api_key) {
        (Some(endpoint), Some(api_key)) => Arc::new(
            HttpEmailSender::new(&endpoint, api_key, args.email_from)
                .context("Failed to construct email sender")?,
        ),
        _ => Arc::new(LogEmailSender),
    };

    let limiter: Arc<dyn RateLimiter> = if args.auth_rate_limit_max == 0 {
        Arc::new(NoopRateLimiter)
    } else {
        Arc::new(FixedWindowLimiter::new(
            args.auth_rate_limit_max,
            Duration::from_secs(args.auth_rate_limit_window_seconds),
        ))
    };

    let auth_state = AuthState::new(config, keys, email, limiter);

    api::serve(args.port, &args.dsn, auth_state).await
}
