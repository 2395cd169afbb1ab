//! Building and reading the session cookie pair.
//!
//! Both tokens travel in `HttpOnly`, `SameSite=Strict` cookies so scripts
//! never see them; `Secure` is added in production mode. Raw header strings
//! are built by hand to keep the attribute set explicit.

use axum::http::{HeaderMap, HeaderValue, header::InvalidHeaderValue};

use super::state::AuthConfig;
use crate::token::Keys;

pub(super) const ACCESS_COOKIE_NAME: &str = "accessToken";
pub(super) const REFRESH_COOKIE_NAME: &str = "refreshToken";

/// Build the `Set-Cookie` values for a freshly issued token pair.
pub(super) fn auth_cookies(
    config: &AuthConfig,
    keys: &Keys,
    access_token: &str,
    refresh_token: &str,
) -> Result<[HeaderValue; 2], InvalidHeaderValue> {
    let access = cookie(
        config,
        ACCESS_COOKIE_NAME,
        access_token,
        keys.access_ttl_seconds(),
    )?;
    let refresh = cookie(
        config,
        REFRESH_COOKIE_NAME,
        refresh_token,
        keys.refresh_ttl_seconds(),
    )?;
    Ok([access, refresh])
}

/// Build `Set-Cookie` values that clear both cookies.
pub(super) fn clear_cookies(config: &AuthConfig) -> Result<[HeaderValue; 2], InvalidHeaderValue> {
    let access = cookie(config, ACCESS_COOKIE_NAME, "", 0)?;
    let refresh = cookie(config, REFRESH_COOKIE_NAME, "", 0)?;
    Ok([access, refresh])
}

fn cookie(
    config: &AuthConfig,
    name: &str,
    value: &str,
    max_age_seconds: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{name}={value}; Path=/; HttpOnly; SameSite=Strict; Max-Age={max_age_seconds}"
    );
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Read a cookie value from the request `Cookie` header.
pub(super) fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}
