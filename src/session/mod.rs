//! Cookie session middleware
//!
//! Store selection, cookie policy, the helpers that keep the session
//! payload down to a user id, and the OAuth handshake cookie.

pub mod config;
pub mod store;

use actix_session::Session;
use actix_web::cookie::time::Duration as CookieDuration;
use actix_web::cookie::{Cookie, SameSite};
use actix_web::HttpRequest;

use crate::error::AppError;
use crate::Result;

pub use config::{
    CookiePolicy, MySqlConnectInfo, MySqlStoreOptions, SessionConfig, StoreConfig, SESSION_COOKIE_NAME,
};
pub use store::{MemorySessionStore, MySqlSessionStore, SessionBackend};

const USER_ID_KEY: &str = "user_id";

/// Carries the OAuth handshake state across the provider redirect. Kept out
/// of the session: a `SameSite=Strict` cookie is withheld on the provider's
/// cross-site redirect back to the callback.
pub const OAUTH_STATE_COOKIE: &str = "prompthouse.oauth_state";
const OAUTH_STATE_PATH: &str = "/auth/google";
const OAUTH_STATE_MAX_AGE_SECS: i64 = 10 * 60;

fn session_error(err: impl std::fmt::Display) -> AppError {
    AppError::SessionError(err.to_string())
}

/// Stores only the user's primary key, under a fresh session id.
pub fn persist_user_id(session: &Session, user_id: &str) -> Result<()> {
    session.renew();
    session.insert(USER_ID_KEY, user_id).map_err(session_error)
}

pub fn user_id(session: &Session) -> Result<Option<String>> {
    session.get::<String>(USER_ID_KEY).map_err(session_error)
}

pub fn clear(session: &Session) {
    session.purge();
}

pub fn oauth_state_cookie(state: &str, secure: bool) -> Cookie<'static> {
    Cookie::build(OAUTH_STATE_COOKIE, state.to_string())
        .path(OAUTH_STATE_PATH)
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::seconds(OAUTH_STATE_MAX_AGE_SECS))
        .finish()
}

/// Expires the handshake cookie; each state value is accepted once.
pub fn expired_oauth_state_cookie(secure: bool) -> Cookie<'static> {
    let mut cookie = oauth_state_cookie("", secure);
    cookie.make_removal();
    cookie
}

pub fn oauth_state(req: &HttpRequest) -> Option<String> {
    req.cookie(OAUTH_STATE_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}
