//! Validation, password hashing, and one-time token helpers.

use anyhow::{Context, Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use base64::Engine;
use rand::{RngCore, rngs::OsRng};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::api::error::FieldError;

/// A parseable argon2id hash that matches no password. Login verifies
/// against it when the email is unknown so the work factor (and therefore
/// response timing) is the same whether or not the account exists.
const PLACEHOLDER_PASSWORD_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

/// Basic email format check; full RFC validation is not the goal.
pub(super) fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email))
}

/// Password policy: at least 8 characters with upper, lower, digit, and
/// special. Returns one entry per failed rule for the 400 detail list.
pub(super) fn validate_password(password: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if password.chars().count() < 8 {
        errors.push(FieldError::new(
            "password",
            "Password must be at least 8 characters long",
        ));
    }
    if !password.chars().any(char::is_uppercase) {
        errors.push(FieldError::new(
            "password",
            "Password must contain an uppercase letter",
        ));
    }
    if !password.chars().any(char::is_lowercase) {
        errors.push(FieldError::new(
            "password",
            "Password must contain a lowercase letter",
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push(FieldError::new(
            "password",
            "Password must contain a digit",
        ));
    }
    if password.chars().all(|c| c.is_alphanumeric() || c.is_whitespace()) {
        errors.push(FieldError::new(
            "password",
            "Password must contain a special character",
        ));
    }
    errors
}

/// Hash a password with argon2id and a fresh salt.
pub(super) fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?
        .to_string();
    Ok(hash)
}

/// Verify a password against a stored argon2id hash.
pub(super) fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Burn a password verification against the placeholder hash. Always false.
pub(super) fn verify_against_placeholder(password: &str) -> bool {
    verify_password(password, PLACEHOLDER_PASSWORD_HASH)
}

/// Create a raw password-reset token. Only its hash is stored.
pub(super) fn generate_reset_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate reset token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a one-time or refresh token so raw values never touch the database.
pub(super) fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}
