#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use prompthouse_auth::db::{NewUser, SessionUser, User, UserRepository};
use prompthouse_auth::error::{AppError, DatabaseError};
use prompthouse_auth::Settings;

/// In-process user table standing in for MySQL.
#[derive(Default)]
pub struct InMemoryUsers {
    users: Mutex<Vec<User>>,
    offline: bool,
}

impl InMemoryUsers {
    pub fn offline() -> Self {
        Self {
            users: Mutex::new(Vec::new()),
            offline: true,
        }
    }

    pub fn with_user(user: User) -> Self {
        Self {
            users: Mutex::new(vec![user]),
            offline: false,
        }
    }

    pub fn all(&self) -> Vec<User> {
        self.users.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), AppError> {
        if self.offline {
            return Err(AppError::DatabaseError(DatabaseError::ConnectionError(
                "connection refused".into(),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for InMemoryUsers {
    async fn find_by_google_id(&self, google_id: &str) -> prompthouse_auth::Result<Option<User>> {
        self.check()?;
        let users = self.users.lock().unwrap();
        Ok(users
            .iter()
            .find(|u| u.google_id.as_deref() == Some(google_id))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> prompthouse_auth::Result<Option<User>> {
        self.check()?;
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.email == email).cloned())
    }

    async fn update_google_link(&self, user: &User) -> prompthouse_auth::Result<User> {
        self.check()?;
        let mut users = self.users.lock().unwrap();
        let stored = users
            .iter_mut()
            .find(|u| u.id == user.id)
            .ok_or(AppError::DatabaseError(DatabaseError::NotFound))?;
        *stored = user.clone();
        Ok(stored.clone())
    }

    async fn create_user(&self, user: &NewUser) -> prompthouse_auth::Result<User> {
        self.check()?;
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.email == user.email) {
            return Err(AppError::DatabaseError(DatabaseError::Duplicate));
        }
        let now = Utc::now();
        let created = User {
            id: user.id.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            google_id: user.google_id.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            profile_picture: user.profile_picture.clone(),
            auth_provider: user.auth_provider.clone(),
            subscription_tier: user.subscription_tier.clone(),
            is_active: user.is_active,
            is_admin: false,
            created_at: now,
            updated_at: now,
        };
        users.push(created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: &str) -> prompthouse_auth::Result<Option<User>> {
        self.check()?;
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    async fn update_password(&self, id: &str, password_hash: &str) -> prompthouse_auth::Result<()> {
        self.check()?;
        let mut users = self.users.lock().unwrap();
        let stored = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(AppError::DatabaseError(DatabaseError::NotFound))?;
        stored.password_hash = Some(password_hash.to_string());
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn find_session_user(&self, id: &str) -> prompthouse_auth::Result<Option<SessionUser>> {
        self.check()?;
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| u.id == id).map(User::session_view))
    }

    async fn ping(&self) -> prompthouse_auth::Result<()> {
        self.check()
    }
}

pub fn local_user(email: &str) -> User {
    let now = Utc::now();
    User {
        id: "local-1".into(),
        email: email.into(),
        password_hash: Some("$2b$12$hash".into()),
        google_id: None,
        first_name: None,
        last_name: None,
        profile_picture: None,
        auth_provider: "local".into(),
        subscription_tier: "pro".into(),
        is_active: true,
        is_admin: false,
        created_at: now,
        updated_at: now,
    }
}

pub fn settings(vars: &[(&str, &str)]) -> Settings {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Settings::from_lookup(|key| vars.get(key).cloned()).expect("Failed to load test settings")
}
