//! Typed client for the masuk API.
//!
//! [`ApiClient`] wraps a cookie-aware `reqwest` client with the two retry
//! layers the API expects from callers:
//!
//! - transient failures (timeouts, 5xx, 429) back off exponentially via
//!   [`RetryPolicy`];
//! - an expired access token triggers a single-flight session refresh via
//!   the internal coordinator, after which the request is replayed exactly
//!   once.
//!
//! All coordination state is owned by the client instance. Two clients
//! never share a refresh flag, so tests (and multi-account tools) can run
//! side by side.

mod refresh;
pub mod retry;

pub use retry::RetryPolicy;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;
use url::Url;

pub use crate::api::handlers::auth::types::{
    ExportResponse, MeResponse, MessageResponse, UserResponse,
};
use refresh::RefreshCoordinator;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const REFRESH_PATH: &str = "auth/refresh";

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with an error envelope.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    /// The session could not be refreshed; a new login is required.
    #[error("session expired; please log in again")]
    SessionExpired,
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("invalid base URL: {0}")]
    BaseUrl(String),
}

#[derive(serde::Deserialize)]
struct ErrorEnvelope {
    message: String,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    retry: RetryPolicy,
    coordinator: RefreshCoordinator,
}

impl ApiClient {
    /// Build a client for the given API base URL.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be
    /// constructed.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url =
            Url::parse(&normalized).map_err(|err| ClientError::BaseUrl(err.to_string()))?;
        let http = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .cookie_store(true)
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|err| ClientError::Network(err.to_string()))?;
        Ok(Self {
            http,
            base_url,
            retry: RetryPolicy::new(),
            coordinator: RefreshCoordinator::new(None),
        })
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Install a hook fired once when the session dies (refresh failure).
    /// UIs typically clear local identity state and route to login here.
    #[must_use]
    pub fn with_session_expired_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.coordinator = RefreshCoordinator::new(Some(Box::new(hook)));
        self
    }

    /// # Errors
    /// Fails with `Api` on validation problems or a duplicate email.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
    ) -> Result<MessageResponse, ClientError> {
        let body = json!({ "email": email, "password": password });
        let response = self
            .send_public(&Method::POST, "auth/register", Some(&body))
            .await?;
        handle_json(response).await
    }

    /// Log in and populate the cookie jar with a fresh session pair.
    ///
    /// # Errors
    /// Fails with `Api` (401) on bad credentials.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserResponse, ClientError> {
        let body = json!({ "email": email, "password": password });
        let response = self
            .send_public(&Method::POST, "auth/login", Some(&body))
            .await?;
        let user: UserResponse = handle_json(response).await?;
        // A successful login revives a session the coordinator had
        // declared dead.
        self.coordinator.reset().await;
        Ok(user)
    }

    /// # Errors
    /// Fails only on transport problems; logout is idempotent server-side.
    pub async fn logout(&self) -> Result<MessageResponse, ClientError> {
        let response = self
            .send_public(&Method::DELETE, "auth/logout", None)
            .await?;
        handle_json(response).await
    }

    /// Explicitly rotate the session pair.
    ///
    /// # Errors
    /// Fails with `Api` (401) when the refresh token is missing, invalid,
    /// or already redeemed.
    pub async fn refresh(&self) -> Result<MessageResponse, ClientError> {
        let response = self.send_public(&Method::POST, REFRESH_PATH, None).await?;
        handle_json(response).await
    }

    /// # Errors
    /// Fails with `SessionExpired` when the session cannot be refreshed.
    pub async fn me(&self) -> Result<MeResponse, ClientError> {
        let response = self.send_authed(&Method::GET, "auth/me", None).await?;
        handle_json(response).await
    }

    /// # Errors
    /// Fails with `Api` on an invalid or already-used token.
    pub async fn verify_email(&self, token: &str) -> Result<MessageResponse, ClientError> {
        let body = json!({ "token": token });
        let response = self
            .send_public(&Method::POST, "auth/verify-email", Some(&body))
            .await?;
        handle_json(response).await
    }

    /// # Errors
    /// Fails with `Api` when the account is already verified.
    pub async fn resend_verification(&self) -> Result<MessageResponse, ClientError> {
        let response = self
            .send_authed(&Method::POST, "auth/resend-verification", None)
            .await?;
        handle_json(response).await
    }

    /// # Errors
    /// Fails only on transport problems; the response is generic by design.
    pub async fn forgot_password(&self, email: &str) -> Result<MessageResponse, ClientError> {
        let body = json!({ "email": email });
        let response = self
            .send_public(&Method::POST, "auth/forgot-password", Some(&body))
            .await?;
        handle_json(response).await
    }

    /// # Errors
    /// Fails with `Api` on a wrong or expired token, or a weak password.
    pub async fn reset_password(
        &self,
        password: &str,
        token: &str,
    ) -> Result<MessageResponse, ClientError> {
        let body = json!({ "password": password, "token": token });
        let response = self
            .send_public(&Method::POST, "auth/reset-password", Some(&body))
            .await?;
        handle_json(response).await
    }

    /// # Errors
    /// Fails with `SessionExpired` when the session cannot be refreshed.
    pub async fn export_data(&self) -> Result<ExportResponse, ClientError> {
        let response = self
            .send_authed(&Method::GET, "auth/export-data", None)
            .await?;
        handle_json(response).await
    }

    /// Delete the account. Calling this method is the confirmation; the
    /// request carries `confirm_deletion: true`.
    ///
    /// # Errors
    /// Fails with `Api` (401) when the password does not match.
    pub async fn delete_account(&self, password: &str) -> Result<MessageResponse, ClientError> {
        let body = json!({ "password": password, "confirm_deletion": true });
        let response = self
            .send_authed(&Method::DELETE, "auth/delete-account", Some(&body))
            .await?;
        handle_json(response).await
    }

    /// Send a request that participates in session refresh: on a 401 the
    /// coordinator runs (or waits for) one refresh, then the request is
    /// replayed exactly once. A second 401 is returned as-is, bounding the
    /// amplification to one extra round-trip.
    async fn send_authed(
        &self,
        method: &Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, ClientError> {
        let observed_epoch = self.coordinator.epoch().await;
        let response = self.send_with_backoff(method, path, body).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(path, "access token rejected; engaging refresh");
        self.coordinator
            .refresh_session(observed_epoch, self.refresh_request())
            .await?;
        self.send_with_backoff(method, path, body).await
    }

    /// Send a request with transient-failure backoff and no auth handling.
    async fn send_public(
        &self,
        method: &Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, ClientError> {
        self.send_with_backoff(method, path, body).await
    }

    async fn send_with_backoff(
        &self,
        method: &Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, ClientError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|err| ClientError::BaseUrl(err.to_string()))?;

        let mut attempt = 0u32;
        loop {
            let mut builder = self.http.request(method.clone(), url.clone());
            if let Some(body) = body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if self.retry.retryable_status(status) && self.retry.should_retry(attempt) {
                        let delay = self.retry.delay(attempt);
                        debug!(%status, attempt, ?delay, "retrying transient failure");
                        sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Ok(response);
                }
                // Timeouts may be transient load; hard connection errors
                // usually are not, so only the former retries.
                Err(err) if err.is_timeout() => {
                    if self.retry.should_retry(attempt) {
                        let delay = self.retry.delay(attempt);
                        debug!(attempt, ?delay, "retrying timed-out request");
                        sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ClientError::Timeout);
                }
                Err(err) => return Err(ClientError::Network(err.to_string())),
            }
        }
    }

    /// The refresh call handed to the coordinator. Built lazily: only the
    /// single-flight winner ever polls it.
    async fn refresh_request(&self) -> Result<(), ClientError> {
        let response = self
            .send_with_backoff(&Method::POST, REFRESH_PATH, None)
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(api_error(status, response).await)
        }
    }
}

async fn handle_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        response
            .json::<T>()
            .await
            .map_err(|err| ClientError::Decode(err.to_string()))
    } else {
        Err(api_error(status, response).await)
    }
}

async fn api_error(status: StatusCode, response: reqwest::Response) -> ClientError {
    let message = response
        .json::<ErrorEnvelope>()
        .await
        .map_or_else(|_| "Request failed.".to_string(), |body| body.message);
    ClientError::Api {
        status: status.as_u16(),
        message,
    }
}
