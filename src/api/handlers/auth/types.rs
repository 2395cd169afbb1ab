//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResetPasswordRequest {
    pub password: String,
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DeleteAccountRequest {
    pub password: String,
    #[serde(default, alias = "confirmDeletion")]
    pub confirm_deletion: bool,
}

/// The public projection of a user. Never carries the password hash,
/// reset-token fields, or any token material.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PublicUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UserResponse {
    pub success: bool,
    pub user: PublicUser,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MeUser {
    pub id: String,
    pub email: String,
    pub role: String,
    pub email_verified: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MeResponse {
    pub success: bool,
    pub user: MeUser,
}

/// Account export: the sanitized profile plus a count of live sessions.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ExportResponse {
    pub success: bool,
    pub user: ExportedUser,
    pub active_sessions: i64,
    pub export_date: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ExportedUser {
    pub id: String,
    pub email: String,
    pub role: String,
    pub email_verified: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl MessageResponse {
    #[must_use]
    pub fn new(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
        }
    }
}
