//! Access-token gate: one extraction routine, three enforcement flavors.
//!
//! Some endpoints are strictly private, some are private with a role
//! restriction, and some are public with optional personalization. All
//! three share the same token parsing so the logic exists exactly once.

use axum::http::{HeaderMap, header::AUTHORIZATION};
use uuid::Uuid;

use super::cookies::{ACCESS_COOKIE_NAME, extract_cookie};
use crate::api::error::ApiError;
use crate::token::Keys;

/// The identity decoded from a valid access token.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: String,
    pub verified: bool,
}

/// Require a valid access token; missing or invalid fails with 401.
pub fn require_auth(headers: &HeaderMap, keys: &Keys) -> Result<AuthUser, ApiError> {
    let token = extract_access_token(headers)
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
    let claims = keys
        .verify_access(&token)
        .map_err(|_| ApiError::unauthorized("Invalid or expired token"))?;
    Ok(AuthUser {
        user_id: claims.sub,
        role: claims.role,
        verified: claims.verified,
    })
}

/// Require a valid access token whose role is in the allow-list; an
/// authenticated caller with the wrong role fails with 403, not 401.
pub fn require_role(
    headers: &HeaderMap,
    keys: &Keys,
    allowed: &[&str],
) -> Result<AuthUser, ApiError> {
    let user = require_auth(headers, keys)?;
    if allowed.iter().any(|role| *role == user.role) {
        Ok(user)
    } else {
        Err(ApiError::forbidden(
            "You do not have permission to access this resource",
        ))
    }
}

/// Attach an identity when a valid token is present; a missing or invalid
/// token silently yields no identity. Never fails.
pub fn optional_auth(headers: &HeaderMap, keys: &Keys) -> Option<AuthUser> {
    require_auth(headers, keys).ok()
}

/// Pull the access token from its cookie, falling back to a bearer header
/// for non-browser callers.
fn extract_access_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_cookie(headers, ACCESS_COOKIE_NAME) {
        return Some(token);
    }
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .trim()
        .strip_prefix("Bearer ")
        .or_else(|| value.trim().strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
