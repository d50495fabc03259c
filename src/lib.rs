pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod session;

use std::sync::Arc;
use actix_web::{web, HttpResponse};
use tracing::{error, warn};

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::{RunMode, Settings};

pub use auth::{AuthService, GoogleStrategy, RateLimit, RateLimitPolicy};
pub use db::{DbOperations, SessionUser, User, UserRepository};
pub use session::{SessionBackend, SessionConfig};

const DEVELOPMENT_JWT_SECRET: &str = "development_secret";

/// Health check endpoint handler
/// Reports database reachability along with a timestamp
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let timestamp = chrono::Utc::now().to_rfc3339();

    match state.auth_service.users().ping().await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "status": "healthy",
            "database": "connected",
            "timestamp": timestamp
        })),
        Err(e) => {
            error!("Health check failed: {}", e);
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "unhealthy",
                "database": "disconnected",
                "timestamp": timestamp
            }))
        }
    }
}

/// Application state shared across all workers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub auth_service: Arc<AuthService>,
    pub google: Option<Arc<GoogleStrategy>>,
}

impl AppState {
    /// Wires the state around an explicitly owned user repository.
    pub fn new(config: Settings, users: Arc<dyn UserRepository>) -> Result<Self> {
        let jwt_secret = match config.auth.jwt_secret.as_deref().or(config.session.secret.as_deref()) {
            Some(secret) => secret.to_string(),
            None if config.is_production() => {
                return Err(AppError::ConfigError(
                    "JWT_SECRET or SESSION_SECRET is required in production".into(),
                ))
            }
            None => {
                warn!("No JWT secret configured, using the development secret");
                DEVELOPMENT_JWT_SECRET.to_string()
            }
        };

        let google = GoogleStrategy::from_config(&config.google)?.map(Arc::new);
        let auth_service = AuthService::new(users, jwt_secret, config.auth.token_expiry_hours)
            .with_password_cost(config.auth.password_cost);

        Ok(Self {
            config: Arc::new(config),
            auth_service: Arc::new(auth_service),
            google,
        })
    }
}

/// The two request throttles; clones share counters.
#[derive(Clone)]
pub struct RateLimiters {
    pub general: RateLimit,
    pub auth: RateLimit,
}

impl RateLimiters {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            general: RateLimit::general(settings),
            auth: RateLimit::authentication(settings),
        }
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, limiters: &RateLimiters) {
    use auth::handlers;

    // `/api/auth` has to be registered ahead of the wider `/api` scope.
    cfg.route("/health", web::get().to(health_check))
        .service(
            web::scope("/api/auth")
                .wrap(limiters.auth.clone())
                .route("/register", web::post().to(handlers::register))
                .route("/login", web::post().to(handlers::login))
                .route("/change-password", web::post().to(handlers::change_password)),
        )
        .service(
            web::scope("/api")
                .wrap(limiters.general.clone())
                .route("/session", web::get().to(handlers::session_status)),
        )
        .service(
            web::scope("/auth")
                .wrap(limiters.auth.clone())
                .route("/google", web::get().to(handlers::google_login))
                .route("/google/callback", web::get().to(handlers::google_callback))
                .route("/me", web::get().to(handlers::current_user))
                .route("/logout", web::post().to(handlers::logout)),
        );
}
