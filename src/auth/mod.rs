//! Authentication module
//!
//! Google OAuth and email/password login, identity resolution against
//! local users, JWT hand-off tokens and the request throttling applied to
//! the API and authentication routes.

pub mod google;
pub mod password;
pub mod handlers;
pub mod rate_limit;
mod service;

pub use google::GoogleStrategy;
pub use rate_limit::{RateLimit, RateLimitPolicy, RateLimitRejection, RateLimiter};
pub use service::{AuthService, Claims, Resolution};
