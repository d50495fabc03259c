//! Database module
//!
//! User records for the login flow and the repository seam the
//! authentication service depends on.

pub mod models;
pub mod operations;

pub use models::{GoogleProfile, NewUser, SessionUser, User};
pub use operations::{DbOperations, DbPoolStatus, UserRepository};
