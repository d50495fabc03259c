use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use config::builder::DefaultState;
use serde::Deserialize;
use std::env;

/// Variables read by name, in addition to the `APP_`-prefixed overrides.
const NAMED_VARIABLES: &[(&str, &str)] = &[
    ("NODE_ENV", "environment"),
    ("PORT", "server.port"),
    ("DATABASE_URL", "database.url"),
    ("SESSION_SECRET", "session.secret"),
    ("JWT_SECRET", "auth.jwt_secret"),
    ("RATE_LIMIT_WINDOW_MS", "rate_limit.window_ms"),
    ("RATE_LIMIT_MAX_REQUESTS", "rate_limit.max_requests"),
    ("DEBUG_RATE_LIMIT", "rate_limit.debug"),
    ("GOOGLE_CLIENT_ID", "google.client_id"),
    ("GOOGLE_CLIENT_SECRET", "google.client_secret"),
    ("GOOGLE_CALLBACK_URL", "google.callback_url"),
    ("ALLOWED_ORIGINS", "cors.allowed_origins"),
];

/// Deployment mode. Anything other than `production` is treated as development.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(from = "String")]
pub enum RunMode {
    Production,
    Development,
}

impl From<String> for RunMode {
    fn from(value: String) -> Self {
        if value.trim().eq_ignore_ascii_case("production") {
            RunMode::Production
        } else {
            RunMode::Development
        }
    }
}

impl RunMode {
    pub fn is_production(self) -> bool {
        self == RunMode::Production
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Production => "production",
            RunMode::Development => "development",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionSettings {
    pub secret: Option<String>,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
    pub token_expiry_hours: i64,
    pub password_cost: u32,
    pub success_redirect: String,
    pub failure_redirect: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitSettings {
    pub window_ms: u64,
    pub max_requests: u32,
    pub debug: bool,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GoogleConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub callback_url: String,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    pub allowed_origins: String,
    pub max_age: u32,
}

impl CorsConfig {
    pub fn origins(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub environment: RunMode,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub session: SessionSettings,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitSettings,
    pub google: GoogleConfig,
    pub cors: CorsConfig,
}

impl Settings {
    /// Loads defaults, optional `config/` files, `APP_` variables and then the
    /// named process variables, each layer overriding the previous one.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("NODE_ENV").unwrap_or_else(|_| "development".into());

        let builder = Self::defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // E.g. `APP_SERVER__WORKERS=4` sets `Settings.server.workers`
            .add_source(
                Environment::with_prefix("app")
                    .separator("__")
                    .try_parsing(true),
            );

        Self::apply_named(builder, |key| env::var(key).ok())?
            .build()?
            .try_deserialize()
    }

    /// Builds settings from defaults and the given variable lookup only.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::apply_named(Self::defaults()?, lookup)?
            .build()?
            .try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("environment", "development")?
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("database.max_connections", 5)?
            .set_default("database.acquire_timeout_secs", 10)?
            .set_default("session.cleanup_interval_secs", 900)?
            .set_default("auth.token_expiry_hours", 24)?
            .set_default("auth.password_cost", bcrypt::DEFAULT_COST as i64)?
            .set_default("auth.success_redirect", "http://localhost:3000/auth/success")?
            .set_default("auth.failure_redirect", "/login?error=oauth_failed")?
            .set_default("rate_limit.window_ms", 15 * 60 * 1000)?
            .set_default("rate_limit.max_requests", 100)?
            .set_default("rate_limit.debug", false)?
            .set_default("rate_limit.cleanup_interval_secs", 60)?
            .set_default("google.callback_url", "/auth/google/callback")?
            .set_default("google.auth_url", "https://accounts.google.com/o/oauth2/v2/auth")?
            .set_default("google.token_url", "https://oauth2.googleapis.com/token")?
            .set_default(
                "google.userinfo_url",
                "https://openidconnect.googleapis.com/v1/userinfo",
            )?
            .set_default("cors.allowed_origins", "http://localhost:3000")?
            .set_default("cors.max_age", 3600)
    }

    fn apply_named<F>(
        mut builder: ConfigBuilder<DefaultState>,
        lookup: F,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (variable, key) in NAMED_VARIABLES {
            let value = lookup(variable).filter(|v| !v.trim().is_empty());
            builder = builder.set_override_option(*key, value)?;
        }
        Ok(builder)
    }

    pub fn is_production(&self) -> bool {
        self.environment.is_production()
    }

    /// Session signing secret: `SESSION_SECRET`, falling back to `JWT_SECRET`.
    pub fn session_secret(&self) -> Option<&str> {
        self.session
            .secret
            .as_deref()
            .or(self.auth.jwt_secret.as_deref())
    }
}

#[cfg(test)]
pub(crate) fn test_settings(vars: &[(&str, &str)]) -> Settings {
    let vars: std::collections::HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Settings::from_lookup(|key| vars.get(key).cloned()).expect("Failed to load test settings")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::from_lookup(lookup_from(&[])).expect("Failed to load settings");
        assert_eq!(settings.environment, RunMode::Development);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.server.workers as usize, num_cpus::get());
        assert!(settings.database.url.is_none());
        assert_eq!(settings.rate_limit.window_ms, 900_000);
        assert_eq!(settings.rate_limit.max_requests, 100);
        assert!(!settings.rate_limit.debug);
        assert!(settings.google.client_id.is_none());
        assert!(settings.session_secret().is_none());
        assert_eq!(settings.auth.password_cost, bcrypt::DEFAULT_COST);
    }

    #[test]
    fn test_named_variable_override() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("NODE_ENV", "production"),
            ("PORT", "8080"),
            ("DATABASE_URL", "mysql://app:pw@db:3306/prompthouse"),
            ("RATE_LIMIT_WINDOW_MS", "60000"),
            ("RATE_LIMIT_MAX_REQUESTS", "25"),
            ("DEBUG_RATE_LIMIT", "true"),
            ("GOOGLE_CLIENT_ID", "client-id"),
            ("GOOGLE_CLIENT_SECRET", "client-secret"),
            ("GOOGLE_CALLBACK_URL", "https://prombank.app/auth/google/callback"),
        ]))
        .expect("Failed to load settings");

        assert!(settings.is_production());
        assert_eq!(settings.server.port, 8080);
        assert_eq!(
            settings.database.url.as_deref(),
            Some("mysql://app:pw@db:3306/prompthouse")
        );
        assert_eq!(settings.rate_limit.window_ms, 60_000);
        assert_eq!(settings.rate_limit.max_requests, 25);
        assert!(settings.rate_limit.debug);
        assert_eq!(settings.google.client_id.as_deref(), Some("client-id"));
        assert_eq!(
            settings.google.callback_url,
            "https://prombank.app/auth/google/callback"
        );
    }

    #[test]
    fn test_session_secret_falls_back_to_jwt_secret() {
        let settings = Settings::from_lookup(lookup_from(&[("JWT_SECRET", "jwt")])).unwrap();
        assert_eq!(settings.session_secret(), Some("jwt"));

        let settings = Settings::from_lookup(lookup_from(&[
            ("JWT_SECRET", "jwt"),
            ("SESSION_SECRET", "session"),
        ]))
        .unwrap();
        assert_eq!(settings.session_secret(), Some("session"));
    }

    #[test]
    fn test_blank_variables_are_ignored() {
        let settings =
            Settings::from_lookup(lookup_from(&[("SESSION_SECRET", "  "), ("PORT", "")])).unwrap();
        assert!(settings.session.secret.is_none());
        assert_eq!(settings.server.port, 3000);
    }

    #[test]
    fn test_run_mode_parsing() {
        assert_eq!(RunMode::from("production".to_string()), RunMode::Production);
        assert_eq!(RunMode::from("Production ".to_string()), RunMode::Production);
        assert_eq!(RunMode::from("staging".to_string()), RunMode::Development);
        assert_eq!(RunMode::from("test".to_string()), RunMode::Development);
    }

    #[test]
    fn test_invalid_rate_limit_window() {
        let result = Settings::from_lookup(lookup_from(&[("RATE_LIMIT_WINDOW_MS", "soon")]));
        assert!(result.is_err(), "Expected error for invalid window");
    }

    #[test]
    fn test_cors_origins() {
        let settings = Settings::from_lookup(lookup_from(&[(
            "ALLOWED_ORIGINS",
            "https://prombank.app, https://www.prombank.app,",
        )]))
        .unwrap();
        assert_eq!(
            settings.cors.origins(),
            vec!["https://prombank.app", "https://www.prombank.app"]
        );
    }
}
