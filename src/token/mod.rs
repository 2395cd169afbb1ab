//! Signing and verification for the three token kinds.
//!
//! Access, refresh, and email-verification tokens are HS256 JWTs signed with
//! three distinct secrets. Secret selection lives here and nowhere else;
//! handlers ask for a kind, never for a key. Any verification failure (bad
//! signature, wrong algorithm, a token of one kind presented where another
//! is expected, lapsed expiry) surfaces as a single error kind so callers
//! cannot accidentally leak why a token was rejected.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
pub const REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
pub const EMAIL_TOKEN_TTL_SECONDS: i64 = 60 * 60;

/// The three token kinds, each signed with its own secret.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
    Email,
}

#[derive(Debug, Error)]
pub enum TokenError {
    /// Signature, algorithm, claim shape, or expiry check failed.
    #[error("invalid or expired token")]
    Invalid,
    #[error("failed to sign token")]
    Sign(#[source] jsonwebtoken::errors::Error),
}

/// Claims carried by an access token: enough to authorize a single request
/// window without touching the database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub role: String,
    pub verified: bool,
    pub iat: i64,
    pub exp: i64,
}

/// Claims carried by a refresh token. Only the subject; role and verification
/// are re-read from the store at redemption time since they may have changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
}

/// Claims carried by an email-verification link token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailClaims {
    pub sub: Uuid,
    pub iat: i64,
    pub exp: i64,
}

/// Holds the per-kind signing material and TTLs.
pub struct Keys {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    email_encoding: EncodingKey,
    email_decoding: DecodingKey,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    email_ttl_seconds: i64,
}

impl Keys {
    #[must_use]
    pub fn new(access: &SecretString, refresh: &SecretString, email: &SecretString) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(access.expose_secret().as_bytes()),
            access_decoding: DecodingKey::from_secret(access.expose_secret().as_bytes()),
            refresh_encoding: EncodingKey::from_secret(refresh.expose_secret().as_bytes()),
            refresh_decoding: DecodingKey::from_secret(refresh.expose_secret().as_bytes()),
            email_encoding: EncodingKey::from_secret(email.expose_secret().as_bytes()),
            email_decoding: DecodingKey::from_secret(email.expose_secret().as_bytes()),
            access_ttl_seconds: ACCESS_TOKEN_TTL_SECONDS,
            refresh_ttl_seconds: REFRESH_TOKEN_TTL_SECONDS,
            email_ttl_seconds: EMAIL_TOKEN_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_email_ttl_seconds(mut self, seconds: i64) -> Self {
        self.email_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    #[must_use]
    pub fn email_ttl_seconds(&self) -> i64 {
        self.email_ttl_seconds
    }

    fn encoding(&self, kind: TokenKind) -> &EncodingKey {
        match kind {
            TokenKind::Access => &self.access_encoding,
            TokenKind::Refresh => &self.refresh_encoding,
            TokenKind::Email => &self.email_encoding,
        }
    }

    fn decoding(&self, kind: TokenKind) -> &DecodingKey {
        match kind {
            TokenKind::Access => &self.access_decoding,
            TokenKind::Refresh => &self.refresh_decoding,
            TokenKind::Email => &self.email_decoding,
        }
    }

    /// Sign an access token asserting {id, role, verified} for one window.
    ///
    /// # Errors
    /// Returns an error if claim serialization or signing fails.
    pub fn sign_access(&self, sub: Uuid, role: &str, verified: bool) -> Result<String, TokenError> {
        let iat = now_unix_seconds();
        let claims = AccessClaims {
            sub,
            role: role.to_string(),
            verified,
            iat,
            exp: iat + self.access_ttl_seconds,
        };
        self.sign(TokenKind::Access, &claims)
    }

    /// Sign a refresh token for the given subject.
    ///
    /// # Errors
    /// Returns an error if claim serialization or signing fails.
    pub fn sign_refresh(&self, sub: Uuid) -> Result<String, TokenError> {
        let iat = now_unix_seconds();
        let claims = RefreshClaims {
            sub,
            iat,
            exp: iat + self.refresh_ttl_seconds,
        };
        self.sign(TokenKind::Refresh, &claims)
    }

    /// Sign an email-verification token for the given subject.
    ///
    /// # Errors
    /// Returns an error if claim serialization or signing fails.
    pub fn sign_email(&self, sub: Uuid) -> Result<String, TokenError> {
        let iat = now_unix_seconds();
        let claims = EmailClaims {
            sub,
            iat,
            exp: iat + self.email_ttl_seconds,
        };
        self.sign(TokenKind::Email, &claims)
    }

    /// Verify an access token and return its claims.
    ///
    /// # Errors
    /// Returns [`TokenError::Invalid`] on any signature, shape, or expiry failure.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        self.verify(TokenKind::Access, token)
    }

    /// Verify a refresh token and return its claims.
    ///
    /// # Errors
    /// Returns [`TokenError::Invalid`] on any signature, shape, or expiry failure.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        self.verify(TokenKind::Refresh, token)
    }

    /// Verify an email-verification token and return its claims.
    ///
    /// # Errors
    /// Returns [`TokenError::Invalid`] on any signature, shape, or expiry failure.
    pub fn verify_email(&self, token: &str) -> Result<EmailClaims, TokenError> {
        self.verify(TokenKind::Email, token)
    }

    fn sign<C: Serialize>(&self, kind: TokenKind, claims: &C) -> Result<String, TokenError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, self.encoding(kind))
            .map_err(TokenError::Sign)
    }

    fn verify<C: for<'de> Deserialize<'de>>(
        &self,
        kind: TokenKind,
        token: &str,
    ) -> Result<C, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        // Expired and malformed collapse into one kind on purpose; callers
        // map every failure to a single unauthorized/bad-request response.
        jsonwebtoken::decode::<C>(token, self.decoding(kind), &validation)
            .map(|data| data.claims)
            .map_err(|_| TokenError::Invalid)
    }
}

fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn keys() -> Keys {
        Keys::new(
            &SecretString::from("access-secret"),
            &SecretString::from("refresh-secret"),
            &SecretString::from("email-secret"),
        )
    }

    #[test]
    fn access_round_trip() -> Result<(), TokenError> {
        let keys = keys();
        let sub = Uuid::new_v4();
        let token = keys.sign_access(sub, "user", false)?;
        let claims = keys.verify_access(&token)?;
        assert_eq!(claims.sub, sub);
        assert_eq!(claims.role, "user");
        assert!(!claims.verified);
        assert_eq!(claims.exp - claims.iat, ACCESS_TOKEN_TTL_SECONDS);
        Ok(())
    }

    #[test]
    fn refresh_round_trip() -> Result<(), TokenError> {
        let keys = keys();
        let sub = Uuid::new_v4();
        let token = keys.sign_refresh(sub)?;
        let claims = keys.verify_refresh(&token)?;
        assert_eq!(claims.sub, sub);
        assert_eq!(claims.exp - claims.iat, REFRESH_TOKEN_TTL_SECONDS);
        Ok(())
    }

    #[test]
    fn kinds_do_not_cross_verify() -> Result<(), TokenError> {
        let keys = keys();
        let sub = Uuid::new_v4();

        // A refresh token must not verify as an access or email token.
        let refresh = keys.sign_refresh(sub)?;
        assert!(matches!(
            keys.verify_access(&refresh),
            Err(TokenError::Invalid)
        ));
        assert!(matches!(
            keys.verify_email(&refresh),
            Err(TokenError::Invalid)
        ));

        let email = keys.sign_email(sub)?;
        assert!(matches!(
            keys.verify_refresh(&email),
            Err(TokenError::Invalid)
        ));
        Ok(())
    }

    #[test]
    fn expired_token_rejected() -> Result<(), TokenError> {
        let keys = keys().with_access_ttl_seconds(-60);
        let token = keys.sign_access(Uuid::new_v4(), "user", true)?;
        assert!(matches!(
            keys.verify_access(&token),
            Err(TokenError::Invalid)
        ));
        Ok(())
    }

    #[test]
    fn garbage_rejected() {
        let keys = keys();
        assert!(matches!(
            keys.verify_access("not-a-token"),
            Err(TokenError::Invalid)
        ));
        assert!(matches!(keys.verify_refresh(""), Err(TokenError::Invalid)));
    }

    #[test]
    fn tampered_token_rejected() -> Result<(), TokenError> {
        let keys = keys();
        let token = keys.sign_access(Uuid::new_v4(), "user", true)?;
        let mut tampered = token.clone();
        tampered.pop();
        assert!(matches!(
            keys.verify_access(&tampered),
            Err(TokenError::Invalid)
        ));
        Ok(())
    }
}
