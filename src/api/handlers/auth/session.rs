//! Login, logout, and refresh-token rotation.

use anyhow::anyhow;
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::cookies::{REFRESH_COOKIE_NAME, auth_cookies, clear_cookies, extract_cookie};
use super::rate_limit::{RateLimitAction, RateLimitDecision, client_ip};
use super::state::AuthState;
use super::storage::{
    UserRecord, delete_refresh_token, insert_refresh_token, lookup_user_by_email,
    lookup_user_by_id, redeem_refresh_token,
};
use super::types::{LoginRequest, MessageResponse, PublicUser, UserResponse};
use super::utils::{hash_token, verify_against_placeholder, verify_password};
use crate::api::error::ApiError;

/// Authenticate with email and password and set the session cookie pair.
///
/// Wrong email and wrong password produce byte-identical responses, and the
/// password check runs even when the email is unknown, so neither the body
/// nor the timing reveals whether an account exists.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated; cookies set", body = UserResponse),
        (status = 401, description = "Invalid email or password"),
        (status = 429, description = "Too many attempts from this address")
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let ip = client_ip(&headers);
    if auth_state.limiter().check(ip.as_deref(), RateLimitAction::Login)
        == RateLimitDecision::Limited
    {
        return Err(ApiError::too_many_requests(
            "Too many authentication attempts, please try again later.",
        ));
    }

    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Missing payload"));
    };

    let user = lookup_user_by_email(&pool, request.email.trim()).await?;
    let password_ok = match &user {
        Some(user) => verify_password(&request.password, &user.password_hash),
        None => verify_against_placeholder(&request.password),
    };
    let Some(user) = user.filter(|_| password_ok) else {
        return Err(ApiError::unauthorized("Invalid email or password"));
    };

    let headers = issue_session(&pool, &auth_state, &user).await?;

    Ok((
        StatusCode::OK,
        headers,
        Json(UserResponse {
            success: true,
            user: PublicUser {
                id: user.id.to_string(),
                email: user.email,
                role: user.role,
            },
        }),
    ))
}

/// Drop the current session. Missing or already-redeemed refresh tokens are
/// not an error; the cookies are cleared unconditionally.
#[utoipa::path(
    delete,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Session cleared", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(token) = extract_cookie(&headers, REFRESH_COOKIE_NAME) {
        if let Err(err) = delete_refresh_token(&pool, &hash_token(&token)).await {
            error!("Failed to delete refresh token at logout: {err:#}");
        }
    }

    let mut response_headers = HeaderMap::new();
    let cleared = clear_cookies(auth_state.config())
        .map_err(|err| anyhow!("failed to build clearing cookies: {err}"))?;
    for value in cleared {
        response_headers.append(SET_COOKIE, value);
    }

    Ok((
        StatusCode::OK,
        response_headers,
        Json(MessageResponse::new("Logged out successfully")),
    ))
}

/// Rotate the session: redeem the presented refresh token and mint a new
/// access/refresh pair.
///
/// Redemption is a conditional delete keyed on both the token hash and the
/// signed subject; of two concurrent calls with the same cookie, exactly one
/// wins the row and the other gets 401.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "Cookies rotated", body = MessageResponse),
        (status = 401, description = "Missing, invalid, or already-redeemed refresh token"),
        (status = 404, description = "User no longer exists")
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(token) = extract_cookie(&headers, REFRESH_COOKIE_NAME) else {
        return Err(ApiError::unauthorized("Refresh token required"));
    };

    // Signature check first: it is cheap and filters forgeries before any
    // store traffic.
    let claims = auth_state
        .keys()
        .verify_refresh(&token)
        .map_err(|_| ApiError::unauthorized("Invalid refresh token"))?;

    if !redeem_refresh_token(&pool, &hash_token(&token), claims.sub).await? {
        return Err(ApiError::unauthorized("Invalid refresh token"));
    }

    // Re-read the user: role or verification may have changed since the
    // token was issued, and the account may be gone entirely.
    let Some(user) = lookup_user_by_id(&pool, claims.sub).await? else {
        return Err(ApiError::not_found("User not found"));
    };

    let response_headers = issue_session(&pool, &auth_state, &user).await?;

    Ok((
        StatusCode::OK,
        response_headers,
        Json(MessageResponse::new("Token refreshed successfully")),
    ))
}

/// Mint an access/refresh pair for the user, store the refresh hash, and
/// return the `Set-Cookie` headers.
pub(super) async fn issue_session(
    pool: &PgPool,
    auth_state: &AuthState,
    user: &UserRecord,
) -> Result<HeaderMap, ApiError> {
    let access = sign_access(auth_state, user)?;
    let refresh = auth_state
        .keys()
        .sign_refresh(user.id)
        .map_err(anyhow::Error::from)?;

    insert_refresh_token(pool, user.id, &hash_token(&refresh)).await?;

    let cookies = auth_cookies(auth_state.config(), auth_state.keys(), &access, &refresh)
        .map_err(|err| anyhow!("failed to build session cookies: {err}"))?;
    let mut headers = HeaderMap::new();
    for value in cookies {
        headers.append(SET_COOKIE, value);
    }
    Ok(headers)
}

fn sign_access(auth_state: &AuthState, user: &UserRecord) -> Result<String, ApiError> {
    auth_state
        .keys()
        .sign_access(user.id, &user.role, user.email_verified)
        .map_err(|err| ApiError::Internal(err.into()))
}
