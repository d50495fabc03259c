use thiserror::Error;
use actix_web::{ResponseError, HttpResponse, http::StatusCode};
use serde_json::json;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    AuthError(#[from] AuthError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::DatabaseError(DatabaseError::NotFound),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AppError::DatabaseError(DatabaseError::Duplicate)
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                AppError::DatabaseError(DatabaseError::ConnectionError(err.to_string()))
            }
            _ => AppError::DatabaseError(DatabaseError::QueryError(err.to_string())),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::AuthError(AuthError::ProviderError(err.to_string()))
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                AppError::AuthError(AuthError::TokenExpired)
            }
            _ => AppError::AuthError(AuthError::InvalidToken),
        }
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(err: bcrypt::BcryptError) -> Self {
        AppError::InternalError(format!("password hashing failed: {}", err))
    }
}

impl From<url::ParseError> for AppError {
    fn from(err: url::ParseError) -> Self {
        AppError::ConfigError(format!("invalid URL: {}", err))
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        // Internal details stay in the logs.
        let message = match self {
            AppError::DatabaseError(DatabaseError::NotFound) => self.to_string(),
            AppError::DatabaseError(_) => "Database error".to_string(),
            AppError::InternalError(_) | AppError::ConfigError(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };
        let response = json!({
            "error": {
                "status": status.as_u16(),
                "message": message
            }
        });
        HttpResponse::build(status).json(response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthError(e) => match e {
                AuthError::InvalidState => StatusCode::BAD_REQUEST,
                AuthError::MissingEmail => StatusCode::UNAUTHORIZED,
                AuthError::ProviderError(_) => StatusCode::BAD_GATEWAY,
                AuthError::TokenExpired => StatusCode::UNAUTHORIZED,
                AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
                AuthError::SessionInvalid => StatusCode::UNAUTHORIZED,
                AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
                AuthError::ProviderNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
                AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                AuthError::EmailTaken => StatusCode::CONFLICT,
                AuthError::PasswordNotSet => StatusCode::BAD_REQUEST,
            },
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::SessionError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::DatabaseError(DatabaseError::NotFound) => StatusCode::NOT_FOUND,
            AppError::DatabaseError(DatabaseError::Duplicate) => StatusCode::CONFLICT,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OAuth state mismatch")]
    InvalidState,

    #[error("Identity provider profile has no email address")]
    MissingEmail,

    #[error("Identity provider error: {0}")]
    ProviderError(String),

    #[error("Identity provider is not configured")]
    ProviderNotConfigured,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Session could not be restored")]
    SessionInvalid,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("An account with this email already exists")]
    EmailTaken,

    #[error("Password change is not available for accounts without a password")]
    PasswordNotSet,
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Record not found")]
    NotFound,

    #[error("Duplicate record")]
    Duplicate,
}
