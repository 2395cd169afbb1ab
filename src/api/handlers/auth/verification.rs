//! Email verification endpoints.

use axum::{Json, extract::Extension, http::HeaderMap, response::IntoResponse};
use sqlx::PgPool;
use std::sync::Arc;

use super::gate::require_auth;
use super::state::AuthState;
use super::storage::{lookup_user_by_id, mark_email_verified};
use super::types::{MessageResponse, VerifyEmailRequest};
use crate::api::email::verification_email;
use crate::api::error::ApiError;

/// Consume a verification token and flip the verified flag.
///
/// A token for an already-verified account is rejected rather than treated
/// as a no-op, so double-use is visible to the caller.
#[utoipa::path(
    post,
    path = "/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 400, description = "Invalid, expired, or already-used token"),
        (status = 404, description = "Account no longer exists")
    ),
    tag = "auth"
)]
pub async fn verify_email(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Missing payload"));
    };

    let claims = auth_state
        .keys()
        .verify_email(request.token.trim())
        .map_err(|_| ApiError::bad_request("Invalid or expired verification token"))?;

    let Some(user) = lookup_user_by_id(&pool, claims.sub).await? else {
        return Err(ApiError::not_found("User not found"));
    };
    if user.email_verified {
        return Err(ApiError::bad_request("Email already verified"));
    }

    mark_email_verified(&pool, user.id).await?;

    Ok(Json(MessageResponse::new(
        "Email verified successfully. You can now login.",
    )))
}

/// Mint and send a fresh verification token for the current user.
///
/// Unlike registration, this send is awaited: the caller asked for exactly
/// this mail, so a delivery failure must surface.
#[utoipa::path(
    post,
    path = "/auth/resend-verification",
    responses(
        (status = 200, description = "Verification email sent", body = MessageResponse),
        (status = 400, description = "Email already verified"),
        (status = 401, description = "Missing or invalid access token")
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let auth_user = require_auth(&headers, auth_state.keys())?;

    let Some(user) = lookup_user_by_id(&pool, auth_user.user_id).await? else {
        return Err(ApiError::not_found("User not found"));
    };
    if user.email_verified {
        return Err(ApiError::bad_request("Email already verified"));
    }

    let token = auth_state
        .keys()
        .sign_email(user.id)
        .map_err(anyhow::Error::from)?;
    let (subject, html) = verification_email(auth_state.config().frontend_base_url(), &token);
    auth_state.email().send(&user.email, &subject, &html).await?;

    Ok(Json(MessageResponse::new(
        "Verification email sent successfully. Please check your inbox.",
    )))
}
