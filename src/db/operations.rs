use async_trait::async_trait;
use chrono::Utc;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::db::models::{NewUser, SessionUser, User};
use crate::error::{AppError, DatabaseError};
use crate::Result;

const USER_COLUMNS: &str = "id, email, password_hash, google_id, first_name, last_name, \
     profile_picture, auth_provider, subscription_tier, is_active, is_admin, created_at, updated_at";

const SESSION_USER_COLUMNS: &str = "id, email, first_name, last_name, profile_picture, \
     auth_provider, subscription_tier, is_active";

const CREATE_USERS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        id VARCHAR(255) NOT NULL PRIMARY KEY,
        email VARCHAR(255) NOT NULL UNIQUE,
        password_hash VARCHAR(255) NULL,
        google_id VARCHAR(255) NULL UNIQUE,
        first_name VARCHAR(255) NULL,
        last_name VARCHAR(255) NULL,
        profile_picture VARCHAR(500) NULL,
        auth_provider VARCHAR(50) NOT NULL DEFAULT 'local',
        subscription_tier VARCHAR(50) NOT NULL DEFAULT 'free',
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        is_admin BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
"#;

/// Data access for user records touched by the login flow.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_google_id(&self, google_id: &str) -> Result<Option<User>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Persists the Google link fields of an existing user.
    async fn update_google_link(&self, user: &User) -> Result<User>;

    async fn create_user(&self, user: &NewUser) -> Result<User>;

    async fn find_by_id(&self, id: &str) -> Result<Option<User>>;

    async fn update_password(&self, id: &str, password_hash: &str) -> Result<()>;

    async fn find_session_user(&self, id: &str) -> Result<Option<SessionUser>>;

    async fn ping(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct DbOperations {
    pool: MySqlPool,
}

impl DbOperations {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| AppError::ConfigError("DATABASE_URL must be set".into()))?;

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(url)
            .await
            .map_err(|e| AppError::DatabaseError(DatabaseError::ConnectionError(e.to_string())))?;

        info!(max_connections = config.max_connections, "Database pool established");
        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_USERS_TABLE).execute(&self.pool).await?;
        info!("Users table created/verified");
        Ok(())
    }

    pub fn get_pool_status(&self) -> DbPoolStatus {
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;

        DbPoolStatus {
            total_connections: size,
            active_connections: size.saturating_sub(idle),
            idle_connections: idle,
        }
    }

    async fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = ?",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl UserRepository for DbOperations {
    async fn find_by_google_id(&self, google_id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE google_id = ? LIMIT 1",
            USER_COLUMNS
        ))
        .bind(google_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE email = ? LIMIT 1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn update_google_link(&self, user: &User) -> Result<User> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET google_id = ?, auth_provider = ?, profile_picture = ?,
                first_name = ?, last_name = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&user.google_id)
        .bind(&user.auth_provider)
        .bind(&user.profile_picture)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(Utc::now())
        .bind(&user.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound.into());
        }
        debug!(user_id = %user.id, "Linked Google identity");

        self.get_user_by_id(&user.id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound.into())
    }

    async fn create_user(&self, user: &NewUser) -> Result<User> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, google_id, first_name, last_name,
                               profile_picture, auth_provider, subscription_tier, is_active,
                               is_admin, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, FALSE, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.google_id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.profile_picture)
        .bind(&user.auth_provider)
        .bind(&user.subscription_tier)
        .bind(user.is_active)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_user_by_id(&user.id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound.into())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        self.get_user_by_id(id).await
    }

    async fn update_password(&self, id: &str, password_hash: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound.into());
        }
        debug!(user_id = %id, "Updated password hash");
        Ok(())
    }

    async fn find_session_user(&self, id: &str) -> Result<Option<SessionUser>> {
        let user = sqlx::query_as::<_, SessionUser>(&format!(
            "SELECT {} FROM users WHERE id = ?",
            SESSION_USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DbPoolStatus {
    pub total_connections: u32,
    pub active_connections: u32,
    pub idle_connections: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_projection_has_no_credentials() {
        assert!(!SESSION_USER_COLUMNS.contains("password_hash"));
        assert!(!SESSION_USER_COLUMNS.contains("google_id"));
        assert!(USER_COLUMNS.contains("password_hash"));
    }

    #[tokio::test]
    async fn test_connect_requires_url() {
        let config = DatabaseConfig {
            url: None,
            max_connections: 1,
            acquire_timeout_secs: 1,
        };
        match DbOperations::connect(&config).await {
            Err(AppError::ConfigError(msg)) => assert!(msg.contains("DATABASE_URL")),
            _ => panic!("Expected configuration error"),
        }
    }

    #[tokio::test]
    async fn test_pool_status_on_lazy_pool() {
        let pool = MySqlPool::connect_lazy("mysql://user:pw@localhost:3306/test")
            .expect("lazy pool");
        let db = DbOperations::new(pool);
        let status = db.get_pool_status();

        assert_eq!(status.total_connections, 0);
        assert_eq!(
            status.active_connections + status.idle_connections,
            status.total_connections
        );
    }
}
