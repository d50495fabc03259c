use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::config::GoogleConfig;
use crate::db::GoogleProfile;
use crate::error::{AppError, AuthError};
use crate::Result;

const SCOPE: &str = "openid email profile";
const STATE_LENGTH: usize = 32;

/// Google OAuth 2.0 authorization-code strategy.
pub struct GoogleStrategy {
    client_id: String,
    client_secret: String,
    callback_url: String,
    auth_url: Url,
    token_url: String,
    userinfo_url: String,
    http: reqwest::Client,
}

impl GoogleStrategy {
    /// Returns `None` when client credentials are not configured.
    pub fn from_config(config: &GoogleConfig) -> Result<Option<Self>> {
        let (client_id, client_secret) = match (&config.client_id, &config.client_secret) {
            (Some(id), Some(secret)) => (id.clone(), secret.clone()),
            _ => {
                warn!("Google OAuth credentials not found, Google login is disabled");
                return Ok(None);
            }
        };

        Ok(Some(Self {
            client_id,
            client_secret,
            callback_url: config.callback_url.clone(),
            auth_url: Url::parse(&config.auth_url)?,
            token_url: config.token_url.clone(),
            userinfo_url: config.userinfo_url.clone(),
            http: reqwest::Client::new(),
        }))
    }

    pub fn generate_state() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(STATE_LENGTH)
            .map(char::from)
            .collect()
    }

    /// Provider URL the browser is redirected to.
    pub fn authorization_url(&self, state: &str, redirect_uri: &str) -> String {
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", SCOPE)
            .append_pair("state", state);
        url.to_string()
    }

    /// Absolute callback URL; relative settings are resolved against the
    /// externally visible origin of the current request.
    pub fn redirect_uri(&self, scheme: &str, host: &str) -> String {
        if self.callback_url.starts_with("http://") || self.callback_url.starts_with("https://") {
            self.callback_url.clone()
        } else {
            format!("{}://{}{}", scheme, host, self.callback_url)
        }
    }

    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<String> {
        let res = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            return Err(AuthError::ProviderError(format!("token endpoint returned {}", status)).into());
        }

        let token: TokenResponse = res.json().await?;
        debug!(token_type = ?token.token_type, "Exchanged authorization code");
        Ok(token.access_token)
    }

    pub async fn fetch_profile(&self, access_token: &str) -> Result<GoogleProfile> {
        let res = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            return Err(AuthError::ProviderError(format!("userinfo endpoint returned {}", status)).into());
        }

        let info: UserInfo = res.json().await?;
        Ok(info.into_profile())
    }

    /// Code exchange followed by the profile lookup.
    pub async fn authenticate(&self, code: &str, redirect_uri: &str) -> Result<GoogleProfile> {
        if code.is_empty() {
            return Err(AppError::ValidationError("missing authorization code".into()));
        }
        let access_token = self.exchange_code(code, redirect_uri).await?;
        self.fetch_profile(&access_token).await
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    given_name: Option<String>,
    #[serde(default)]
    family_name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

impl UserInfo {
    fn into_profile(self) -> GoogleProfile {
        GoogleProfile {
            id: self.sub,
            emails: self.email.into_iter().collect(),
            given_name: self.given_name,
            family_name: self.family_name,
            photos: self.picture.into_iter().collect(),
        }
    }
}
