//! Account registration.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::rate_limit::{RateLimitAction, RateLimitDecision, client_ip};
use super::state::AuthState;
use super::storage::{RegisterOutcome, insert_user};
use super::types::{MessageResponse, RegisterRequest};
use super::utils::{hash_password, valid_email, validate_password};
use crate::api::email::verification_email;
use crate::api::error::{ApiError, FieldError};

/// Create an unverified account and queue a verification email.
///
/// Email delivery is fire-and-forget: a lost mail does not roll back the
/// account, since verification can be re-requested later.
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = MessageResponse),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Email already registered"),
        (status = 429, description = "Too many attempts from this address")
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let ip = client_ip(&headers);
    if auth_state
        .limiter()
        .check(ip.as_deref(), RateLimitAction::Register)
        == RateLimitDecision::Limited
    {
        return Err(ApiError::too_many_requests(
            "Too many registration attempts, please try again later.",
        ));
    }

    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Missing payload"));
    };

    let email = request.email.trim();
    let mut errors = Vec::new();
    if !valid_email(email) {
        errors.push(FieldError::new("email", "Invalid email address"));
    }
    errors.extend(validate_password(&request.password));
    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }

    let password_hash = hash_password(&request.password)?;
    let user_id = match insert_user(&pool, email, &password_hash).await? {
        RegisterOutcome::Created(id) => id,
        RegisterOutcome::Conflict => {
            return Err(ApiError::conflict(
                "An account with this email already exists",
            ));
        }
    };

    let token = auth_state
        .keys()
        .sign_email(user_id)
        .map_err(anyhow::Error::from)?;
    let (subject, html) = verification_email(auth_state.config().frontend_base_url(), &token);
    let sender = Arc::clone(auth_state.email());
    let to = email.to_string();
    tokio::spawn(async move {
        if let Err(err) = sender.send(&to, &subject, &html).await {
            error!("Failed to send verification email: {err:#}");
        }
    });

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new(
            "Registration successful. Please check your email to verify your account.",
        )),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::{auth_state, lazy_pool};
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn register_missing_payload() {
        let response = register(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
            None,
        )
        .await
        .err().expect("missing payload")
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn register_rejects_invalid_email_and_weak_password() {
        let err = register(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
            Some(Json(RegisterRequest {
                email: "not-an-email".to_string(),
                password: "weak".to_string(),
            })),
        )
        .await
        .err().expect("validation");
        match err {
            ApiError::BadRequest { errors, .. } => {
                assert!(errors.iter().any(|e| e.field == "email"));
                assert!(errors.iter().any(|e| e.field == "password"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
