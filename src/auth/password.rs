use std::sync::OnceLock;

use regex::Regex;

use crate::error::AppError;
use crate::Result;

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_NAME_LENGTH: usize = 50;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
    })
}

/// Returns the trimmed address.
pub fn validate_email(email: &str) -> Result<&str> {
    let email = email.trim();
    if !email_pattern().is_match(email) {
        return Err(AppError::ValidationError("Invalid email address".into()));
    }
    Ok(email)
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::ValidationError(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LENGTH
        )));
    }
    if !password.chars().any(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::ValidationError(
            "Password must contain at least one letter".into(),
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(AppError::ValidationError(
            "Password must contain at least one number".into(),
        ));
    }
    Ok(())
}

/// Returns the trimmed name.
pub fn validate_name<'a>(field: &str, name: &'a str) -> Result<&'a str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::ValidationError(format!("{} cannot be empty", field)));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(AppError::ValidationError(format!(
            "{} cannot be longer than {} characters",
            field, MAX_NAME_LENGTH
        )));
    }
    Ok(name)
}

// bcrypt is CPU bound; keep it off the async workers.
pub async fn hash_password(password: &str, cost: u32) -> Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?
        .map_err(AppError::from)
}

pub async fn verify_password(password: &str, password_hash: &str) -> Result<bool> {
    let password = password.to_string();
    let password_hash = password_hash.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &password_hash))
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?
        .map_err(AppError::from)
}
