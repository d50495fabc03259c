use std::collections::HashMap;
use std::sync::Arc;

use actix_session::storage::{LoadError, SaveError, SessionKey, SessionStore, UpdateError};
use actix_web::cookie::time::Duration;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{AppError, DatabaseError};
use crate::session::config::MySqlStoreOptions;

type SessionState = HashMap<String, String>;

const SESSION_KEY_LENGTH: usize = 64;

fn generate_session_key() -> Result<SessionKey, anyhow::Error> {
    let value: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_KEY_LENGTH)
        .map(char::from)
        .collect();

    SessionKey::try_from(value).map_err(|_| anyhow::anyhow!("generated session key was rejected"))
}

fn expiry_after(ttl: &Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(ttl.whole_seconds())
}

fn into_update_error(err: SaveError) -> UpdateError {
    match err {
        SaveError::Serialization(e) => UpdateError::Serialization(e),
        SaveError::Other(e) => UpdateError::Other(e),
    }
}

/// Session backing store selected by run mode.
#[derive(Clone)]
pub enum SessionBackend {
    MySql(MySqlSessionStore),
    Memory(MemorySessionStore),
}

impl SessionBackend {
    /// Removes expired session records, returning how many were dropped.
    pub async fn clear_expired(&self) -> Result<u64, AppError> {
        match self {
            SessionBackend::MySql(store) => store.clear_expired().await,
            SessionBackend::Memory(store) => Ok(store.clear_expired().await),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SessionBackend::MySql(_) => "mysql",
            SessionBackend::Memory(_) => "memory",
        }
    }
}

impl SessionStore for SessionBackend {
    async fn load(&self, session_key: &SessionKey) -> Result<Option<SessionState>, LoadError> {
        match self {
            SessionBackend::MySql(store) => store.load(session_key).await,
            SessionBackend::Memory(store) => store.load(session_key).await,
        }
    }

    async fn save(&self, session_state: SessionState, ttl: &Duration) -> Result<SessionKey, SaveError> {
        match self {
            SessionBackend::MySql(store) => store.save(session_state, ttl).await,
            SessionBackend::Memory(store) => store.save(session_state, ttl).await,
        }
    }

    async fn update(
        &self,
        session_key: SessionKey,
        session_state: SessionState,
        ttl: &Duration,
    ) -> Result<SessionKey, UpdateError> {
        match self {
            SessionBackend::MySql(store) => store.update(session_key, session_state, ttl).await,
            SessionBackend::Memory(store) => store.update(session_key, session_state, ttl).await,
        }
    }

    async fn update_ttl(&self, session_key: &SessionKey, ttl: &Duration) -> Result<(), anyhow::Error> {
        match self {
            SessionBackend::MySql(store) => store.update_ttl(session_key, ttl).await,
            SessionBackend::Memory(store) => store.update_ttl(session_key, ttl).await,
        }
    }

    async fn delete(&self, session_key: &SessionKey) -> Result<(), anyhow::Error> {
        match self {
            SessionBackend::MySql(store) => store.delete(session_key).await,
            SessionBackend::Memory(store) => store.delete(session_key).await,
        }
    }
}

/// SQL statements for a configured sessions table.
#[derive(Debug)]
struct SessionQueries {
    create_table: String,
    load: String,
    insert: String,
    upsert: String,
    touch: String,
    delete: String,
    clear_expired: String,
}

impl SessionQueries {
    fn new(options: &MySqlStoreOptions) -> Self {
        let table = &options.table;
        let id = &options.id_column;
        let expires = &options.expires_column;
        let data = &options.data_column;

        Self {
            create_table: format!(
                "CREATE TABLE IF NOT EXISTS `{table}` (\
                 `{id}` VARCHAR(128) COLLATE utf8mb4_bin NOT NULL, \
                 `{expires}` INT(11) UNSIGNED NOT NULL, \
                 `{data}` MEDIUMTEXT COLLATE utf8mb4_bin, \
                 PRIMARY KEY (`{id}`)) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"
            ),
            load: format!("SELECT `{data}` FROM `{table}` WHERE `{id}` = ? AND `{expires}` > ?"),
            insert: format!("INSERT INTO `{table}` (`{id}`, `{expires}`, `{data}`) VALUES (?, ?, ?)"),
            upsert: format!(
                "INSERT INTO `{table}` (`{id}`, `{expires}`, `{data}`) VALUES (?, ?, ?) \
                 ON DUPLICATE KEY UPDATE `{expires}` = VALUES(`{expires}`), `{data}` = VALUES(`{data}`)"
            ),
            touch: format!("UPDATE `{table}` SET `{expires}` = ? WHERE `{id}` = ?"),
            delete: format!("DELETE FROM `{table}` WHERE `{id}` = ?"),
            clear_expired: format!("DELETE FROM `{table}` WHERE `{expires}` < ?"),
        }
    }
}

/// Persistent store keeping one row per session in MySQL.
#[derive(Clone)]
pub struct MySqlSessionStore {
    pool: MySqlPool,
    queries: Arc<SessionQueries>,
}

impl MySqlSessionStore {
    pub async fn connect(options: &MySqlStoreOptions) -> Result<Self, AppError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(options.connection.connect_options())
            .await
            .map_err(|e| AppError::DatabaseError(DatabaseError::ConnectionError(e.to_string())))?;

        let store = Self::from_pool(pool, options);
        if options.create_table_if_missing {
            store.create_table().await?;
        }
        info!(table = %options.table, host = %options.connection.host, "MySQL session store ready");
        Ok(store)
    }

    pub fn from_pool(pool: MySqlPool, options: &MySqlStoreOptions) -> Self {
        Self {
            pool,
            queries: Arc::new(SessionQueries::new(options)),
        }
    }

    pub async fn create_table(&self) -> Result<(), AppError> {
        sqlx::query(&self.queries.create_table)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear_expired(&self) -> Result<u64, AppError> {
        let result = sqlx::query(&self.queries.clear_expired)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn write(
        &self,
        sql: &str,
        session_key: &SessionKey,
        session_state: &SessionState,
        ttl: &Duration,
    ) -> Result<(), SaveError> {
        let data = serde_json::to_string(session_state)
            .map_err(|e| SaveError::Serialization(anyhow::Error::new(e)))?;

        sqlx::query(sql)
            .bind(session_key.as_ref())
            .bind(expiry_after(ttl).timestamp())
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(|e| SaveError::Other(anyhow::Error::new(e)))?;

        Ok(())
    }

    async fn load(&self, session_key: &SessionKey) -> Result<Option<SessionState>, LoadError> {
        let row: Option<Option<String>> = sqlx::query_scalar(&self.queries.load)
            .bind(session_key.as_ref())
            .bind(Utc::now().timestamp())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LoadError::Other(anyhow::Error::new(e)))?;

        match row.flatten() {
            Some(data) => serde_json::from_str(&data)
                .map(Some)
                .map_err(|e| LoadError::Deserialization(anyhow::Error::new(e))),
            None => Ok(None),
        }
    }

    async fn save(&self, session_state: SessionState, ttl: &Duration) -> Result<SessionKey, SaveError> {
        let session_key = generate_session_key().map_err(SaveError::Other)?;
        self.write(&self.queries.insert, &session_key, &session_state, ttl)
            .await?;
        Ok(session_key)
    }

    async fn update(
        &self,
        session_key: SessionKey,
        session_state: SessionState,
        ttl: &Duration,
    ) -> Result<SessionKey, UpdateError> {
        self.write(&self.queries.upsert, &session_key, &session_state, ttl)
            .await
            .map_err(into_update_error)?;
        Ok(session_key)
    }

    async fn update_ttl(&self, session_key: &SessionKey, ttl: &Duration) -> Result<(), anyhow::Error> {
        sqlx::query(&self.queries.touch)
            .bind(expiry_after(ttl).timestamp())
            .bind(session_key.as_ref())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, session_key: &SessionKey) -> Result<(), anyhow::Error> {
        sqlx::query(&self.queries.delete)
            .bind(session_key.as_ref())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    state: SessionState,
    expires_at: DateTime<Utc>,
}

/// In-process store. Sessions are lost on restart and are not shared
/// between processes, so it is only suitable for development.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    entries: Arc<RwLock<HashMap<String, MemoryEntry>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn clear_expired(&self) -> u64 {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        (before - entries.len()) as u64
    }

    async fn load(&self, session_key: &SessionKey) -> Result<Option<SessionState>, LoadError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(session_key.as_ref())
            .filter(|entry| entry.expires_at > Utc::now())
            .map(|entry| entry.state.clone()))
    }

    async fn save(&self, session_state: SessionState, ttl: &Duration) -> Result<SessionKey, SaveError> {
        let session_key = generate_session_key().map_err(SaveError::Other)?;
        self.entries.write().await.insert(
            session_key.as_ref().to_string(),
            MemoryEntry {
                state: session_state,
                expires_at: expiry_after(ttl),
            },
        );
        Ok(session_key)
    }

    async fn update(
        &self,
        session_key: SessionKey,
        session_state: SessionState,
        ttl: &Duration,
    ) -> Result<SessionKey, UpdateError> {
        {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(session_key.as_ref()) {
                entry.state = session_state;
                entry.expires_at = expiry_after(ttl);
                return Ok(session_key);
            }
        }

        debug!("Session vanished before update, saving under a new key");
        self.save(session_state, ttl).await.map_err(into_update_error)
    }

    async fn update_ttl(&self, session_key: &SessionKey, ttl: &Duration) -> Result<(), anyhow::Error> {
        if let Some(entry) = self.entries.write().await.get_mut(session_key.as_ref()) {
            entry.expires_at = expiry_after(ttl);
        }
        Ok(())
    }

    async fn delete(&self, session_key: &SessionKey) -> Result<(), anyhow::Error> {
        self.entries.write().await.remove(session_key.as_ref());
        Ok(())
    }
}
