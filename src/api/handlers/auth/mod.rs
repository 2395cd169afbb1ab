//! Auth endpoints: registration, sessions, verification, password reset.

pub mod account;
pub mod cookies;
pub mod gate;
pub mod password_reset;
pub mod rate_limit;
pub mod register;
pub mod session;
pub mod state;
pub mod storage;
pub mod types;
pub mod utils;
pub mod verification;

pub use gate::AuthUser;
pub use rate_limit::{FixedWindowLimiter, NoopRateLimiter, RateLimiter};
pub use state::{AuthConfig, AuthState};
