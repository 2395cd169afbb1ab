//! Authenticated account endpoints: profile, data export, deletion.

use anyhow::anyhow;
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;

use super::cookies::clear_cookies;
use super::gate::require_auth;
use super::state::AuthState;
use super::storage::{
    count_refresh_tokens, current_timestamp, delete_user, lookup_user_by_id,
};
use super::types::{
    DeleteAccountRequest, ExportResponse, ExportedUser, MeResponse, MeUser, MessageResponse,
};
use super::utils::verify_password;
use crate::api::error::ApiError;

/// Return the current user. The token proves identity, but the row is
/// re-read so a deleted account answers 404 instead of echoing stale claims.
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Missing or invalid access token"),
        (status = 404, description = "Account no longer exists")
    ),
    tag = "auth"
)]
pub async fn me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let auth_user = require_auth(&headers, auth_state.keys())?;

    let Some(user) = lookup_user_by_id(&pool, auth_user.user_id).await? else {
        return Err(ApiError::not_found("User not found"));
    };

    Ok(Json(MeResponse {
        success: true,
        user: MeUser {
            id: user.id.to_string(),
            email: user.email,
            role: user.role,
            email_verified: user.email_verified,
        },
    }))
}

/// Export the caller's data: the sanitized profile and a count of live
/// sessions. Password hashes and token material never leave the store.
#[utoipa::path(
    get,
    path = "/auth/export-data",
    responses(
        (status = 200, description = "Account data export", body = ExportResponse),
        (status = 401, description = "Missing or invalid access token"),
        (status = 404, description = "Account no longer exists")
    ),
    tag = "auth"
)]
pub async fn export_data(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let auth_user = require_auth(&headers, auth_state.keys())?;

    let Some(user) = lookup_user_by_id(&pool, auth_user.user_id).await? else {
        return Err(ApiError::not_found("User not found"));
    };
    let active_sessions = count_refresh_tokens(&pool, user.id).await?;
    let export_date = current_timestamp(&pool).await?;

    Ok(Json(ExportResponse {
        success: true,
        user: ExportedUser {
            id: user.id.to_string(),
            email: user.email,
            role: user.role,
            email_verified: user.email_verified,
            created_at: user.created_at,
            updated_at: user.updated_at,
        },
        active_sessions,
        export_date,
    }))
}

/// Delete the account after re-proving the password. A hijacked session
/// alone must not be enough for a destructive, irreversible action.
#[utoipa::path(
    delete,
    path = "/auth/delete-account",
    request_body = DeleteAccountRequest,
    responses(
        (status = 200, description = "Account deleted; cookies cleared", body = MessageResponse),
        (status = 400, description = "Deletion not confirmed"),
        (status = 401, description = "Missing token or wrong password")
    ),
    tag = "auth"
)]
pub async fn delete_account(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<DeleteAccountRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let auth_user = require_auth(&headers, auth_state.keys())?;

    let Some(Json(request)) = payload else {
        return Err(ApiError::bad_request("Missing payload"));
    };
    if !request.confirm_deletion {
        return Err(ApiError::bad_request("Account deletion must be confirmed"));
    }

    let Some(user) = lookup_user_by_id(&pool, auth_user.user_id).await? else {
        return Err(ApiError::not_found("User not found"));
    };
    if !verify_password(&request.password, &user.password_hash) {
        return Err(ApiError::unauthorized("Invalid password"));
    }

    delete_user(&pool, user.id).await?;

    let mut response_headers = HeaderMap::new();
    let cleared = clear_cookies(auth_state.config())
        .map_err(|err| anyhow!("failed to build clearing cookies: {err}"))?;
    for value in cleared {
        response_headers.append(SET_COOKIE, value);
    }

    Ok((
        StatusCode::OK,
        response_headers,
        Json(MessageResponse::new("Account deleted successfully")),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::{auth_state, headers_with_access, lazy_pool};

    #[tokio::test]
    async fn me_requires_token() {
        let err = me(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
        )
        .await
        .err().expect("no token");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn export_requires_token() {
        let err = export_data(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(auth_state()),
        )
        .await
        .err().expect("no token");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn delete_account_requires_confirmation() {
        let state = auth_state();
        let (headers, _) = headers_with_access(&state);
        let err = delete_account(
            headers,
            Extension(lazy_pool()),
            Extension(state),
            Some(Json(DeleteAccountRequest {
                password: "Abcd123!".to_string(),
                confirm_deletion: false,
            })),
        )
        .await
        .err().expect("unconfirmed");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_account_missing_payload() {
        let state = auth_state();
        let (headers, _) = headers_with_access(&state);
        let err = delete_account(headers, Extension(lazy_pool()), Extension(state), None)
            .await
            .err().expect("missing payload");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
