use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const PROVIDER_GOOGLE: &str = "google";
pub const PROVIDER_LOCAL: &str = "local";
pub const DEFAULT_SUBSCRIPTION_TIER: &str = "free";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub google_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_picture: Option<String>,
    pub auth_provider: String,
    pub subscription_tier: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn has_google_identity(&self) -> bool {
        self.google_id.as_deref().map_or(false, |id| !id.is_empty())
    }

    /// Links a Google identity onto an email-matched record. Existing
    /// picture and name fields win over the profile's.
    pub fn link_google(&mut self, profile: &GoogleProfile) {
        self.google_id = Some(profile.id.clone());
        self.auth_provider = PROVIDER_GOOGLE.to_string();
        if is_blank(&self.profile_picture) {
            self.profile_picture = profile.primary_photo().map(str::to_string);
        }
        if is_blank(&self.first_name) {
            self.first_name = profile.given_name.clone();
        }
        if is_blank(&self.last_name) {
            self.last_name = profile.family_name.clone();
        }
        self.updated_at = Utc::now();
    }

    pub fn session_view(&self) -> SessionUser {
        SessionUser {
            id: self.id.clone(),
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            profile_picture: self.profile_picture.clone(),
            auth_provider: self.auth_provider.clone(),
            subscription_tier: self.subscription_tier.clone(),
            is_active: self.is_active,
        }
    }
}

fn is_blank(field: &Option<String>) -> bool {
    field.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Fields for a user created by a first Google login or a registration.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub id: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub google_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_picture: Option<String>,
    pub auth_provider: String,
    pub subscription_tier: String,
    pub is_active: bool,
}

impl NewUser {
    pub fn from_google(profile: &GoogleProfile, email: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_hash: None,
            google_id: Some(profile.id.clone()),
            first_name: profile.given_name.clone(),
            last_name: profile.family_name.clone(),
            profile_picture: profile.primary_photo().map(str::to_string),
            auth_provider: PROVIDER_GOOGLE.to_string(),
            subscription_tier: DEFAULT_SUBSCRIPTION_TIER.to_string(),
            is_active: true,
        }
    }

    /// Email/password registration; `password_hash` is already hashed.
    pub fn local(email: &str, first_name: &str, last_name: &str, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_hash: Some(password_hash),
            google_id: None,
            first_name: Some(first_name.to_string()),
            last_name: Some(last_name.to_string()),
            profile_picture: None,
            auth_provider: PROVIDER_LOCAL.to_string(),
            subscription_tier: DEFAULT_SUBSCRIPTION_TIER.to_string(),
            is_active: true,
        }
    }
}

/// Restricted projection reloaded from the session on each request.
/// Carries no credential or provider identifiers.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct SessionUser {
    pub id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_picture: Option<String>,
    pub auth_provider: String,
    pub subscription_tier: String,
    pub is_active: bool,
}

/// Profile assertion returned by the identity provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GoogleProfile {
    pub id: String,
    pub emails: Vec<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub photos: Vec<String>,
}

impl GoogleProfile {
    pub fn primary_email(&self) -> Option<&str> {
        self.emails
            .first()
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
    }

    pub fn primary_photo(&self) -> Option<&str> {
        self.photos.first().map(String::as_str).filter(|p| !p.is_empty())
    }
}

#[cfg(test)]
pub(crate) fn sample_user(email: &str) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4().to_string(),
        email: email.to_string(),
        password_hash: Some("$argon2id$v=19$secret".to_string()),
        google_id: None,
        first_name: None,
        last_name: None,
        profile_picture: None,
        auth_provider: PROVIDER_LOCAL.to_string(),
        subscription_tier: "pro".to_string(),
        is_active: true,
        is_admin: false,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
pub(crate) fn sample_profile() -> GoogleProfile {
    GoogleProfile {
        id: "google-sub-42".to_string(),
        emails: vec!["ada@example.com".to_string()],
        given_name: Some("Ada".to_string()),
        family_name: Some("Lovelace".to_string()),
        photos: vec!["https://lh3.googleusercontent.com/a/ada".to_string()],
    }
}
