use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::auth::password;
use crate::db::{GoogleProfile, NewUser, SessionUser, User, UserRepository};
use crate::error::{AppError, AuthError, DatabaseError};
use crate::Result;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,   // User ID
    pub email: String,
    pub exp: i64,      // Expiration time
    pub iat: i64,      // Issued at
}

/// How an identity was matched to a local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    ExistingGoogleUser,
    LinkedByEmail,
    Created,
}

pub struct AuthService {
    users: Arc<dyn UserRepository>,
    jwt_secret: String,
    token_expiry_hours: i64,
    password_cost: u32,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserRepository>, jwt_secret: String, token_expiry_hours: i64) -> Self {
        Self {
            users,
            jwt_secret,
            token_expiry_hours,
            password_cost: bcrypt::DEFAULT_COST,
        }
    }

    pub fn with_password_cost(mut self, cost: u32) -> Self {
        self.password_cost = cost;
        self
    }

    pub fn users(&self) -> &Arc<dyn UserRepository> {
        &self.users
    }

    /// Maps a provider profile onto a local user: by Google id, then by
    /// email (linking the identity), otherwise a new record.
    pub async fn resolve_identity(&self, profile: &GoogleProfile) -> Result<(User, Resolution)> {
        let email = profile.primary_email().ok_or(AuthError::MissingEmail)?;

        if let Some(found) = self.match_existing(profile, email).await? {
            return Ok(found);
        }

        let new_user = NewUser::from_google(profile, email);
        match self.users.create_user(&new_user).await {
            Ok(user) => {
                info!(user_id = %user.id, "Created user from Google login");
                Ok((user, Resolution::Created))
            }
            Err(AppError::DatabaseError(DatabaseError::Duplicate)) => {
                // A concurrent first login created the record first.
                warn!(google_id = %profile.id, "Duplicate user on create, resolving existing record");
                self.match_existing(profile, email)
                    .await?
                    .ok_or(AppError::DatabaseError(DatabaseError::Duplicate))
            }
            Err(e) => {
                error!(google_id = %profile.id, "Failed to create user: {}", e);
                Err(e)
            }
        }
    }

    async fn match_existing(
        &self,
        profile: &GoogleProfile,
        email: &str,
    ) -> Result<Option<(User, Resolution)>> {
        if let Some(user) = self.users.find_by_google_id(&profile.id).await? {
            return Ok(Some((user, Resolution::ExistingGoogleUser)));
        }

        let Some(mut user) = self.users.find_by_email(email).await? else {
            return Ok(None);
        };

        if user.has_google_identity() {
            warn!(
                user_id = %user.id,
                "Email matches a user linked to another Google account, leaving the link unchanged"
            );
            return Ok(Some((user, Resolution::LinkedByEmail)));
        }

        user.link_google(profile);
        let user = self.users.update_google_link(&user).await?;
        info!(user_id = %user.id, "Linked Google identity to existing user");
        Ok(Some((user, Resolution::LinkedByEmail)))
    }

    /// Reloads the restricted projection for a session's user id.
    pub async fn load_session_user(&self, user_id: &str) -> Result<Option<SessionUser>> {
        self.users.find_session_user(user_id).await.map_err(|e| {
            error!(user_id = %user_id, "Failed to restore session user: {}", e);
            AppError::AuthError(AuthError::SessionInvalid)
        })
    }

    /// Creates a `local` account after validating every field.
    pub async fn register_local(
        &self,
        email: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<User> {
        let email = password::validate_email(email)?;
        password::validate_password(password)?;
        let first_name = password::validate_name("First name", first_name)?;
        let last_name = password::validate_name("Last name", last_name)?;

        if self.users.find_by_email(email).await?.is_some() {
            return Err(AuthError::EmailTaken.into());
        }

        let password_hash = password::hash_password(password, self.password_cost).await?;
        let new_user = NewUser::local(email, first_name, last_name, password_hash);
        match self.users.create_user(&new_user).await {
            Ok(user) => {
                info!(user_id = %user.id, "Registered local user");
                Ok(user)
            }
            Err(AppError::DatabaseError(DatabaseError::Duplicate)) => Err(AuthError::EmailTaken.into()),
            Err(e) => Err(e),
        }
    }

    /// Email/password login. Unknown, inactive and password-less accounts
    /// fail the same way as a wrong password.
    pub async fn authenticate_local(&self, email: &str, password: &str) -> Result<User> {
        let user = match self.users.find_by_email(email.trim()).await? {
            Some(user) if user.is_active => user,
            _ => return Err(AuthError::InvalidCredentials.into()),
        };
        let Some(password_hash) = user.password_hash.as_deref() else {
            warn!(user_id = %user.id, "Password login attempted for an account without a password");
            return Err(AuthError::InvalidCredentials.into());
        };

        if !password::verify_password(password, password_hash).await? {
            return Err(AuthError::InvalidCredentials.into());
        }
        Ok(user)
    }

    pub async fn change_password(
        &self,
        user_id: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<()> {
        password::validate_password(new_password)?;

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AppError::AuthError(AuthError::Unauthorized))?;
        let password_hash = user
            .password_hash
            .as_deref()
            .ok_or(AppError::AuthError(AuthError::PasswordNotSet))?;

        if !password::verify_password(current_password, password_hash).await? {
            return Err(AuthError::InvalidCredentials.into());
        }

        let new_hash = password::hash_password(new_password, self.password_cost).await?;
        self.users.update_password(&user.id, &new_hash).await?;
        info!(user_id = %user.id, "Password changed");
        Ok(())
    }

    pub fn issue_token(&self, user: &User) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            exp: (now + Duration::hours(self.token_expiry_hours)).timestamp(),
            iat: now.timestamp(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )?;

        Ok(token)
    }

    pub fn decode_token(&self, token: &str) -> Result<Claims> {
        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )?;

        Ok(claims.claims)
    }

    /// Resolves a bearer token to the same projection a session yields.
    pub async fn validate_token(&self, token: &str) -> Result<SessionUser> {
        let claims = self.decode_token(token)?;
        self.load_session_user(&claims.sub)
            .await?
            .ok_or(AppError::AuthError(AuthError::Unauthorized))
    }
}
