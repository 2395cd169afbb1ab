//! # Masuk (Account & Session API)
//!
//! `masuk` is a small account service: registration, login, email
//! verification, password reset, and session continuation through rotating
//! refresh tokens.
//!
//! ## Session Model
//!
//! Every login issues a pair of HS256 tokens carried in `HttpOnly` cookies:
//!
//! - **Access token** (15 minutes): a signed assertion of user id, role, and
//!   verification flag. Never stored server-side; validity is signature +
//!   expiry only.
//! - **Refresh token** (7 days): signed with a separate secret and also
//!   recorded in the database as a SHA-256 hash. Redemption deletes the row
//!   and mints a new pair, so a given refresh token is honored at most once.
//!   The store lookup is what allows revocation (logout, password reset,
//!   account deletion) before the signature naturally expires.
//!
//! Email verification links use a third signing secret. Compromise of any
//! one secret cannot be used to forge tokens of another kind.
//!
//! ## Enumeration Resistance
//!
//! Login failures, forgot-password responses, and resend requests are
//! indistinguishable between "no such account" and "wrong credential";
//! password verification runs against a placeholder hash when the email is
//! unknown so response timing does not leak account existence.
//!
//! ## Client
//!
//! The [`client`] module ships a typed API client with a single-flight
//! refresh coordinator: a burst of concurrent requests hitting an expired
//! access token triggers exactly one refresh call, with the rest queued and
//! replayed once the rotation completes.

pub mod api;
pub mod cli;
pub mod client;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
