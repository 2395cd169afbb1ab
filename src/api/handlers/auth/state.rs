//! Auth configuration and shared state.

use std::sync::Arc;

use super::rate_limit::RateLimiter;
use crate::api::email::EmailSender;
use crate::token::Keys;

const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 15 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    production: bool,
    reset_token_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            production: false,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    /// Whether cookies carry the `Secure` attribute.
    pub(super) fn cookie_secure(&self) -> bool {
        self.production
    }

    pub(super) fn reset_token_ttl_seconds(&self) -> i64 {
        self.reset_token_ttl_seconds
    }
}

/// Shared auth state: configuration, signing keys, the email collaborator,
/// and the rate limiter guarding the brute-forceable flows.
pub struct AuthState {
    config: AuthConfig,
    keys: Keys,
    email: Arc<dyn EmailSender>,
    limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        keys: Keys,
        email: Arc<dyn EmailSender>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            config,
            keys,
            email,
            limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub(crate) fn email(&self) -> &Arc<dyn EmailSender> {
        &self.email
    }

    pub(super) fn limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::email::LogEmailSender;
    use crate::api::handlers::auth::rate_limit::NoopRateLimiter;
    use secrecy::SecretString;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new("https://masuk.dev".to_string());
        assert_eq!(config.frontend_base_url(), "https://masuk.dev");
        assert!(!config.cookie_secure());
        assert_eq!(
            config.reset_token_ttl_seconds(),
            super::DEFAULT_RESET_TOKEN_TTL_SECONDS
        );

        let config = config
            .with_production(true)
            .with_reset_token_ttl_seconds(120);
        assert!(config.cookie_secure());
        assert_eq!(config.reset_token_ttl_seconds(), 120);
    }

    #[test]
    fn auth_state_exposes_parts() {
        let keys = Keys::new(
            &SecretString::from("a"),
            &SecretString::from("r"),
            &SecretString::from("e"),
        );
        let state = AuthState::new(
            AuthConfig::new("https://masuk.dev".to_string()),
            keys,
            Arc::new(LogEmailSender),
            Arc::new(NoopRateLimiter),
        );
        assert_eq!(state.config().frontend_base_url(), "https://masuk.dev");
        assert_eq!(state.keys().access_ttl_seconds(), 15 * 60);
    }
}
