//! Password reset: request a reset link, then redeem it.

use axum::{Json, extract::Extension, http::HeaderMap, response::IntoResponse};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::rate_limit::{RateLimitAction, RateLimitDecision, client_ip};
use super::state::AuthState;
use super::storage::{
    apply_password_reset, clear_password_reset, lookup_user_by_email, lookup_user_by_reset_hash,
    set_password_reset,
};
use super::types::{ForgotPasswordRequest, MessageResponse, ResetPasswordRequest};
use super::utils::{generate_reset_token, hash_password, hash_token, validate_password};
use crate::api::email::reset_email;
use crate::api::error::ApiError;

/// The response is identical whether or not the account exists.
const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account exists with this email, a password reset link has been sent.";

/// Start a reset: store a hashed one-time token and mail the raw value.
///
/// This is the one flow where email delivery failure surfaces: without the
/// mail the user cannot finish the reset, so the stored token is cleared
/// (a compensating update, not a transaction) and the caller gets a 500.
#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Generic acknowledgement", body = MessageResponse),
        (status = 429, description = "Too many attempts from this address"),
        (status = 500, description = "Reset email could not be delivered")
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let ip = client_ip(&headers);
    if auth_state
        .limiter()
        .check(ip.as_deref(), RateLimitAction::ForgotPassword)
        == RateLimitDecision::Limited
    {
        return Err(ApiError::too_many_requests(
            "Too many password reset requests, please try again later.",
        ));
    }

    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Missing payload"));
    };

    // Unknown emails get the same answer with no store mutation.
    let Some(user) = lookup_user_by_email(&pool, request.email.trim()).await? else {
        return Ok(Json(MessageResponse::new(FORGOT_PASSWORD_MESSAGE)));
    };

    let token = generate_reset_token()?;
    set_password_reset(
        &pool,
        user.id,
        &hash_token(&token),
        auth_state.config().reset_token_ttl_seconds(),
    )
    .await?;

    let (subject, html) = reset_email(auth_state.config().frontend_base_url(), &token);
    if let Err(err) = auth_state.email().send(&user.email, &subject, &html).await {
        if let Err(rollback_err) = clear_password_reset(&pool, user.id).await {
            error!("Failed to clear reset token after send failure: {rollback_err:#}");
        }
        return Err(ApiError::Internal(err.context(
            "Failed to send password reset email. Please try again later.",
        )));
    }

    Ok(Json(MessageResponse::new(FORGOT_PASSWORD_MESSAGE)))
}

/// Redeem a reset token and replace the password.
///
/// Wrong and expired tokens collapse into one message. Success purges every
/// refresh token for the user: a reset treats prior sessions as suspect, so
/// all devices must log in again.
#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password replaced", body = MessageResponse),
        (status = 400, description = "Invalid or expired reset token, or weak password")
    ),
    tag = "auth"
)]
pub async fn reset_password(
    pool: Extension<PgPool>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Missing payload"));
    };

    let errors = validate_password(&request.password);
    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }

    let Some(user) = lookup_user_by_reset_hash(&pool, &hash_token(request.token.trim())).await?
    else {
        return Err(ApiError::bad_request(
            "Invalid or expired password reset token",
        ));
    };

    let password_hash = hash_password(&request.password)?;
    apply_password_reset(&pool, user.id, &password_hash).await?;

    Ok(Json(MessageResponse::new(
        "Password reset successfully. You can now login with your new password.",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::{auth_state, lazy_pool};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn forgot_password_missing_payload() {
        let err = forgot_password(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
            None,
        )
        .await
        .err().expect("missing payload");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reset_password_missing_payload() {
        let err = reset_password(Extension(lazy_pool()), None)
            .await
            .err().expect("missing payload");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reset_password_enforces_policy_before_lookup() {
        let err = reset_password(
            Extension(lazy_pool()),
            Some(Json(ResetPasswordRequest {
                password: "weak".to_string(),
                token: "whatever".to_string(),
            })),
        )
        .await
        .err().expect("weak password");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        match err {
            ApiError::BadRequest { errors, .. } => assert!(!errors.is_empty()),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
