//! A [`TokenStore`] backed by the config file: refreshes expired OAuth
//! access tokens against Google's token endpoint and persists the result
//! back to disk, re-architected out of the teacher's pattern of mutating
//! shared config state directly inside the provider client (see
//! `forge_providers::gemini_oauth` module docs).

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use forge_providers::{AccessToken, ClientError, TokenStore};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::schema::OAuthTokens;
use crate::store;

const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Clone)]
pub struct OAuthClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

pub struct ConfigTokenStore {
    config_path: PathBuf,
    provider_key: String,
    credentials: OAuthClientCredentials,
    http: reqwest::Client,
    state: RwLock<OAuthTokens>,
}

impl ConfigTokenStore {
    /// Build a store seeded from whatever tokens are currently on disk
    /// under `provider_key` (e.g. `"gemini-oauth"`).
    pub fn load(config_path: PathBuf, provider_key: impl Into<String>, credentials: OAuthClientCredentials, http: reqwest::Client) -> store::Result<Self> {
        let provider_key = provider_key.into();
        let config = store::load(&config_path)?;
        let state = config.oauth_tokens(&provider_key).cloned().unwrap_or_default();
        Ok(Self {
            config_path,
            provider_key,
            credentials,
            http,
            state: RwLock::new(state),
        })
    }
}

#[async_trait::async_trait]
impl TokenStore for ConfigTokenStore {
    async fn current(&self) -> AccessToken {
        let state = self.state.read().await;
        to_access_token(&state)
    }

    async fn refresh(&self) -> Result<AccessToken, ClientError> {
        let refresh_token = self.state.read().await.refresh_token.clone();
        if refresh_token.is_empty() {
            return Err(ClientError::AuthInvalid {
                message: "no refresh token on file; re-authenticate".to_string(),
            });
        }

        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let response = self.http.post(TOKEN_ENDPOINT).form(&params).send().await.map_err(|err| ClientError::Network {
            attempts: 1,
            message: err.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(if status.as_u16() == 401 || status.as_u16() == 403 {
                ClientError::AuthInvalid { message: body }
            } else {
                ClientError::http(status.as_u16(), &body)
            });
        }

        let body: RefreshResponse = response.json().await.map_err(|err| ClientError::ProviderMalformed {
            message: err.to_string(),
        })?;

        let expires_at = SystemTime::now() + Duration::from_secs(body.expires_in);
        let mut state = self.state.write().await;
        state.access_token = body.access_token.clone();
        state.expires_at = expires_at.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        Ok(to_access_token(&state))
    }

    async fn persist(&self, token: &AccessToken) {
        let mut config = match store::load(&self.config_path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load config before persisting refreshed oauth token");
                return;
            }
        };

        let expires_at = token.expires_at.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        let mut tokens = config.oauth_tokens(&self.provider_key).cloned().unwrap_or_default();
        tokens.access_token = token.token.clone();
        tokens.expires_at = expires_at;
        config.set_oauth_tokens(self.provider_key.clone(), tokens);

        if let Err(err) = store::save(&self.config_path, &config) {
            tracing::warn!(error = %err, "failed to persist refreshed oauth token");
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: u64,
}

fn to_access_token(tokens: &OAuthTokens) -> AccessToken {
    AccessToken {
        token: tokens.access_token.clone(),
        expires_at: UNIX_EPOCH + Duration::from_secs(tokens.expires_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Config;

    fn credentials() -> OAuthClientCredentials {
        OAuthClientCredentials {
            client_id: "test-client".to_string(),
            client_secret: "test-secret".to_string(),
        }
    }

    #[tokio::test]
    async fn current_reflects_tokens_on_disk_at_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.set_oauth_tokens(
            "gemini-oauth",
            OAuthTokens {
                access_token: "tok-1".to_string(),
                refresh_token: "refresh-1".to_string(),
                expires_at: 1_700_000_000,
                email: "user@example.com".to_string(),
                project_id: "proj".to_string(),
            },
        );
        store::save(&path, &config).expect("save");

        let token_store = ConfigTokenStore::load(path, "gemini-oauth", credentials(), reqwest::Client::new()).expect("load");
        let current = token_store.current().await;
        assert_eq!(current.token, "tok-1");
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_is_auth_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        store::save(&path, &Config::default()).expect("save");

        let token_store = ConfigTokenStore::load(path, "gemini-oauth", credentials(), reqwest::Client::new()).expect("load");
        let err = token_store.refresh().await.expect_err("should fail");
        assert!(matches!(err, ClientError::AuthInvalid { .. }));
    }
}
