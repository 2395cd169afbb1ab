//! Rate limiting for the brute-forceable auth flows.
//!
//! Registration, login, and forgot-password are the endpoints worth
//! hammering (credential stuffing, enumeration probing, mail bombing), so
//! they share a strict per-address budget. The rest of the API rides on the
//! short access-token window instead.

use axum::http::HeaderMap;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Entries kept before expired windows are swept out of the map.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Clone, Copy, Debug)]
pub enum RateLimitAction {
    Register,
    Login,
    ForgotPassword,
}

impl RateLimitAction {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Login => "login",
            Self::ForgotPassword => "forgot-password",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision;
}

/// Limiter that allows everything; local dev and tests.
#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _ip: Option<&str>, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

struct WindowState {
    started_at: Instant,
    count: u32,
}

/// Fixed-window counter per `(action, address)` pair. Callers without a
/// resolvable address share one bucket rather than bypassing the limit.
pub struct FixedWindowLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<String, WindowState>>,
}

impl FixedWindowLimiter {
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        let key = format!("{}:{}", action.as_str(), ip.unwrap_or("unknown"));
        let now = Instant::now();

        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if windows.len() >= PRUNE_THRESHOLD {
            windows.retain(|_, state| now.duration_since(state.started_at) < self.window);
        }

        let state = windows.entry(key).or_insert(WindowState {
            started_at: now,
            count: 0,
        });
        if now.duration_since(state.started_at) >= self.window {
            state.started_at = now;
            state.count = 0;
        }

        if state.count >= self.max_requests {
            RateLimitDecision::Limited
        } else {
            state.count += 1;
            RateLimitDecision::Allowed
        }
    }
}

/// Best-effort client address: first `X-Forwarded-For` hop, then
/// `X-Real-IP`. The service is expected to sit behind a proxy that sets
/// one of these.
pub(super) fn client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        let first = forwarded.to_str().ok()?.split(',').next()?.trim();
        if !first.is_empty() {
            return Some(first.to_string());
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn noop_always_allows() {
        let limiter = NoopRateLimiter;
        for _ in 0..100 {
            assert_eq!(
                limiter.check(Some("10.0.0.1"), RateLimitAction::Login),
                RateLimitDecision::Allowed
            );
        }
    }

    #[test]
    fn fixed_window_limits_after_budget() {
        let limiter = FixedWindowLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert_eq!(
                limiter.check(Some("10.0.0.1"), RateLimitAction::Login),
                RateLimitDecision::Allowed
            );
        }
        assert_eq!(
            limiter.check(Some("10.0.0.1"), RateLimitAction::Login),
            RateLimitDecision::Limited
        );
    }

    #[test]
    fn buckets_are_per_address_and_action() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_secs(60));
        assert_eq!(
            limiter.check(Some("10.0.0.1"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        // A different address and a different action each get their own
        // budget; the same pair does not.
        assert_eq!(
            limiter.check(Some("10.0.0.2"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check(Some("10.0.0.1"), RateLimitAction::Register),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check(Some("10.0.0.1"), RateLimitAction::Login),
            RateLimitDecision::Limited
        );
    }

    #[test]
    fn window_resets_after_elapsing() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_millis(10));
        assert_eq!(
            limiter.check(Some("10.0.0.1"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check(Some("10.0.0.1"), RateLimitAction::Login),
            RateLimitDecision::Limited
        );
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(
            limiter.check(Some("10.0.0.1"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn missing_address_shares_one_bucket() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_secs(60));
        assert_eq!(
            limiter.check(None, RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check(None, RateLimitAction::Login),
            RateLimitDecision::Limited
        );
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_ip(&headers), Some("203.0.113.7".to_string()));

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_ip(&headers), Some("10.0.0.2".to_string()));

        assert_eq!(client_ip(&HeaderMap::new()), None);
    }
}
