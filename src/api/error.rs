//! API error taxonomy and the uniform response envelope.
//!
//! Every failure leaving the API is one of six kinds, aligned with its HTTP
//! status. All of them are expected, user-facing conditions except
//! [`ApiError::Internal`], which wraps a dependency failure: those log the
//! full source chain server-side while the response body stays generic.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};
use utoipa::ToSchema;

/// A single field-level validation failure, included in 400 responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    #[must_use]
    pub fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input, failed validation, or a spent/expired one-time token.
    #[error("{message}")]
    BadRequest {
        message: String,
        errors: Vec<FieldError>,
    },
    /// Bad credentials or an invalid/expired session token.
    #[error("{0}")]
    Unauthorized(String),
    /// Authenticated, but the role is not allowed here.
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    /// Duplicate resource, e.g. an email that is already registered.
    #[error("{0}")]
    Conflict(String),
    /// The caller exceeded an auth-flow rate budget.
    #[error("{0}")]
    TooManyRequests(String),
    /// A downstream dependency failed; details are logged, not returned.
    #[error("Something went wrong. Please try again later.")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    #[must_use]
    pub fn bad_request(message: &str) -> Self {
        Self::BadRequest {
            message: message.to_string(),
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn validation(errors: Vec<FieldError>) -> Self {
        Self::BadRequest {
            message: "Validation failed".to_string(),
            errors,
        }
    }

    #[must_use]
    pub fn unauthorized(message: &str) -> Self {
        Self::Unauthorized(message.to_string())
    }

    #[must_use]
    pub fn forbidden(message: &str) -> Self {
        Self::Forbidden(message.to_string())
    }

    #[must_use]
    pub fn not_found(message: &str) -> Self {
        Self::NotFound(message.to_string())
    }

    #[must_use]
    pub fn conflict(message: &str) -> Self {
        Self::Conflict(message.to_string())
    }

    #[must_use]
    pub fn too_many_requests(message: &str) -> Self {
        Self::TooManyRequests(message.to_string())
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if let Self::Internal(source) = &self {
            // Operational errors are the caller's problem; this one is ours.
            error!("internal error: {source:#}");
        } else {
            warn!(status = %status, "request failed: {self}");
        }

        // Development builds surface the underlying message for debugging;
        // release builds return the generic text from the variant.
        let message = match &self {
            Self::Internal(source) if cfg!(debug_assertions) => source.to_string(),
            _ => self.to_string(),
        };

        let body = match &self {
            Self::BadRequest { errors, .. } if !errors.is_empty() => json!({
                "success": false,
                "message": message,
                "errors": errors,
            }),
            _ => json!({
                "success": false,
                "message": message,
            }),
        };

        (status, Json(body)).into_response()
    }
}
