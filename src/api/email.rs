//! Email delivery abstraction and message templates.
//!
//! Call sites decide the blocking contract: registration dispatches
//! fire-and-forget (a lost verification mail can be resent later), while
//! forgot-password awaits the send and compensates on failure, since without
//! that mail the user has no way to finish the reset.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::{Instrument, info, info_span};
use url::Url;

/// Maximum provider error characters kept for logs.
const MAX_ERROR_CHARS: usize = 200;

/// Email delivery abstraction used by the auth handlers.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error so the caller can compensate.
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()>;
}

/// Local dev sender that logs the message instead of delivering it.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, to: &str, subject: &str, _html: &str) -> Result<()> {
        info!(to_email = %to, subject = %subject, "email send stub");
        Ok(())
    }
}

/// Sender that posts messages to an HTTP email API with a bearer key.
pub struct HttpEmailSender {
    client: Client,
    endpoint: Url,
    api_key: SecretString,
    from: String,
}

impl HttpEmailSender {
    /// # Errors
    /// Returns an error if the endpoint URL is invalid or the HTTP client
    /// cannot be constructed.
    pub fn new(endpoint: &str, api_key: SecretString, from: String) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .with_context(|| format!("invalid email endpoint: {endpoint}"))?;
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .build()
            .context("failed to build email HTTP client")?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            from,
        })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()> {
        let payload = json!({
            "from": self.from,
            "to": to,
            "subject": subject,
            "html": html,
        });

        let span = info_span!(
            "email.send",
            http.method = "POST",
            url = %self.endpoint
        );
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(self.api_key.expose_secret())
            .json(&payload)
            .send()
            .instrument(span)
            .await
            .context("email API request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail: String = body.trim().chars().take(MAX_ERROR_CHARS).collect();
            return Err(anyhow!("email API returned {status}: {detail}"));
        }

        Ok(())
    }
}

/// Build the verification mail pointing at the frontend route.
#[must_use]
pub fn verification_email(frontend_base_url: &str, token: &str) -> (String, String) {
    let url = frontend_url(frontend_base_url, "verify-email", token);
    let subject = "Email Verification".to_string();
    let html = format!(
        "<p>Welcome! Please verify your email by clicking <a href=\"{url}\">here</a>.</p>\
         <p>This link will expire in 1 hour.</p>"
    );
    (subject, html)
}

/// Build the password-reset mail pointing at the frontend route.
#[must_use]
pub fn reset_email(frontend_base_url: &str, token: &str) -> (String, String) {
    let url = frontend_url(frontend_base_url, "reset-password", token);
    let subject = "Password Reset Request".to_string();
    let html = format!(
        "<p>You requested to reset your password. Click the link below to reset it:</p>\
         <a href=\"{url}\">Reset Password</a>\
         <p>This link will expire in 15 minutes.</p>\
         <p>If you didn't request this, please ignore this email.</p>"
    );
    (subject, html)
}

fn frontend_url(frontend_base_url: &str, route: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/{route}/{token}")
}
