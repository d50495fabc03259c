use actix_session::Session;
use actix_web::http::header::{AUTHORIZATION, LOCATION};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use url::Url;

use crate::auth::GoogleStrategy;
use crate::db::{SessionUser, User};
use crate::error::{AppError, AuthError};
use crate::session;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct AccountSummary {
    pub id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_admin: bool,
}

impl From<&User> for AccountSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            is_admin: user.is_admin,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: &'static str,
    pub user: AccountSummary,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<SessionUser>,
}

fn google_strategy(state: &AppState) -> Result<&GoogleStrategy, AppError> {
    state
        .google
        .as_deref()
        .ok_or(AppError::AuthError(AuthError::ProviderNotConfigured))
}

fn callback_redirect_uri(req: &HttpRequest, google: &GoogleStrategy) -> String {
    let connection_info = req.connection_info();
    google.redirect_uri(connection_info.scheme(), connection_info.host())
}

/// Starts the Google login by redirecting to the consent screen.
pub async fn google_login(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let google = google_strategy(&state)?;

    let oauth_state = GoogleStrategy::generate_state();
    let redirect_uri = callback_redirect_uri(&req, google);

    Ok(HttpResponse::Found()
        .insert_header((LOCATION, google.authorization_url(&oauth_state, &redirect_uri)))
        .cookie(session::oauth_state_cookie(&oauth_state, state.config.is_production()))
        .finish())
}

/// Completes the login. Every failure after the provider is configured
/// ends at the failure redirect.
pub async fn google_callback(
    req: HttpRequest,
    query: web::Query<CallbackQuery>,
    session: Session,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let google = google_strategy(&state)?;

    let location = match complete_login(&req, &query, &session, &state, google).await {
        Ok(location) => location,
        Err(e) => {
            warn!("Google login failed: {}", e);
            session::clear(&session);
            state.config.auth.failure_redirect.clone()
        }
    };

    Ok(HttpResponse::Found()
        .insert_header((LOCATION, location))
        .cookie(session::expired_oauth_state_cookie(state.config.is_production()))
        .finish())
}

async fn complete_login(
    req: &HttpRequest,
    query: &CallbackQuery,
    session: &Session,
    state: &AppState,
    google: &GoogleStrategy,
) -> Result<String, AppError> {
    if let Some(error) = &query.error {
        return Err(AuthError::ProviderError(error.clone()).into());
    }

    let expected = session::oauth_state(req);
    match (expected.as_deref(), query.state.as_deref()) {
        (Some(expected), Some(received)) if expected == received => {}
        _ => return Err(AuthError::InvalidState.into()),
    }

    let code = query.code.as_deref().unwrap_or_default();
    let profile = google
        .authenticate(code, &callback_redirect_uri(req, google))
        .await?;
    let (user, resolution) = state.auth_service.resolve_identity(&profile).await?;

    session::persist_user_id(session, &user.id)?;
    let token = state.auth_service.issue_token(&user)?;
    info!(user_id = %user.id, resolution = ?resolution, "Google login succeeded");

    let mut location = Url::parse(&state.config.auth.success_redirect)?;
    location.query_pairs_mut().append_pair("token", &token);
    Ok(location.into())
}

/// Reloads the signed-in user from the session, falling back to a bearer token.
pub async fn authenticate_request(
    req: &HttpRequest,
    session: &Session,
    state: &AppState,
) -> Result<Option<SessionUser>, AppError> {
    if let Some(user_id) = session::user_id(session)? {
        match state.auth_service.load_session_user(&user_id).await? {
            Some(user) => return Ok(Some(user)),
            None => {
                warn!(user_id = %user_id, "Session refers to a missing user");
                session::clear(session);
            }
        }
    }

    let bearer = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match bearer {
        Some(token) => state.auth_service.validate_token(token).await.map(Some),
        None => Ok(None),
    }
}

pub async fn current_user(
    req: HttpRequest,
    session: Session,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user = authenticate_request(&req, &session, &state)
        .await?
        .ok_or(AppError::AuthError(AuthError::Unauthorized))?;

    Ok(HttpResponse::Ok().json(user))
}

/// Session diagnostics; never fails on a bad session.
pub async fn session_status(
    req: HttpRequest,
    session: Session,
    state: web::Data<AppState>,
) -> HttpResponse {
    let user = match authenticate_request(&req, &session, &state).await {
        Ok(user) => user,
        Err(e) => {
            error!("Session status check failed: {}", e);
            None
        }
    };

    HttpResponse::Ok().json(SessionStatus {
        authenticated: user.is_some(),
        user,
    })
}

fn sign_in(
    session: &Session,
    state: &AppState,
    user: &User,
    message: &'static str,
) -> Result<AuthResponse, AppError> {
    session::persist_user_id(session, &user.id)?;
    let token = state.auth_service.issue_token(user)?;
    Ok(AuthResponse {
        success: true,
        message,
        user: AccountSummary::from(user),
        token,
    })
}

pub async fn register(
    req: web::Json<RegisterRequest>,
    session: Session,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!("Received registration request for email: {}", req.email);
    let user = state
        .auth_service
        .register_local(&req.email, &req.password, &req.first_name, &req.last_name)
        .await
        .map_err(|e| {
            warn!("Registration failed for email: {}: {}", req.email, e);
            e
        })?;

    let body = sign_in(&session, &state, &user, "User registered successfully")?;
    Ok(HttpResponse::Created().json(body))
}

pub async fn login(
    req: web::Json<LoginRequest>,
    session: Session,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user = state
        .auth_service
        .authenticate_local(&req.email, &req.password)
        .await
        .map_err(|e| {
            warn!("Login failed for email: {}: {}", req.email, e);
            e
        })?;
    info!(user_id = %user.id, "Password login succeeded");

    let body = sign_in(&session, &state, &user, "Login successful")?;
    Ok(HttpResponse::Ok().json(body))
}

pub async fn change_password(
    req: HttpRequest,
    body: web::Json<ChangePasswordRequest>,
    session: Session,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user = authenticate_request(&req, &session, &state)
        .await?
        .ok_or(AppError::AuthError(AuthError::Unauthorized))?;

    state
        .auth_service
        .change_password(&user.id, &body.current_password, &body.new_password)
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Password changed successfully"
    })))
}

pub async fn logout(session: Session) -> HttpResponse {
    session::clear(&session);
    HttpResponse::Ok().json(serde_json::json!({
        "message": "Successfully logged out"
    }))
}
