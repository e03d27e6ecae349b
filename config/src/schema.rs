//! The on-disk configuration shape: per-provider settings, indexer
//! settings, and persisted OAuth tokens. All fields are optional so a
//! partial config file layers cleanly over built-in defaults.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub stream: Option<bool>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub http_timeout_secs: Option<u64>,
    pub extended_thinking: Option<bool>,
    pub thinking_budget: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IndexerSettings {
    pub chunk_size: Option<usize>,
    pub max_file_size: Option<u64>,
    pub cache_ttl_secs: Option<u64>,
    pub index_patterns: Option<Vec<String>>,
    pub exclude_patterns: Option<Vec<String>>,
    pub batch_size: Option<usize>,
    pub worker_count: Option<usize>,
    pub debounce_ms: Option<u64>,
    pub periodic_interval_secs: Option<u64>,
    pub max_pending_files: Option<usize>,
}

/// OAuth tokens persisted in the config store, keyed by provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: u64,
    pub email: String,
    pub project_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub indexer: IndexerSettings,
    #[serde(default)]
    pub oauth: HashMap<String, OAuthTokens>,
}

impl Config {
    #[must_use]
    pub fn provider(&self, key: &str) -> Option<&ProviderConfig> {
        self.providers.get(key)
    }

    #[must_use]
    pub fn oauth_tokens(&self, provider_key: &str) -> Option<&OAuthTokens> {
        self.oauth.get(provider_key)
    }

    pub fn set_oauth_tokens(&mut self, provider_key: impl Into<String>, tokens: OAuthTokens) {
        self.oauth.insert(provider_key.into(), tokens);
    }
}
