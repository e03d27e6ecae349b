//! Client identity: which provider wire format, and which model.

use serde::{Deserialize, Serialize};

/// The four supported provider wire formats.
///
/// `AnthropicCompatible` covers every Anthropic-messages-shaped backend,
/// distinguished at the client level by `base_url` (see `forge-providers`'
/// BaseURL routing), not by a separate enum variant per vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    GeminiApiKey,
    GeminiOAuth,
    AnthropicCompatible,
    Ollama,
}

impl Provider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::GeminiApiKey => "gemini-api-key",
            Provider::GeminiOAuth => "gemini-oauth",
            Provider::AnthropicCompatible => "anthropic-compatible",
            Provider::Ollama => "ollama",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini-api-key" | "gemini" => Some(Provider::GeminiApiKey),
            "gemini-oauth" => Some(Provider::GeminiOAuth),
            "anthropic-compatible" | "anthropic" | "claude" => Some(Provider::AnthropicCompatible),
            "ollama" => Some(Provider::Ollama),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(provider, model)` — the client pool key. Model is an opaque string;
/// the spec deliberately does not validate it against a known-model list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub provider: Provider,
    pub model: String,
}

impl ClientIdentity {
    #[must_use]
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

impl std::fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_common_aliases() {
        assert_eq!(Provider::parse("gemini"), Some(Provider::GeminiApiKey));
        assert_eq!(Provider::parse("Claude"), Some(Provider::AnthropicCompatible));
        assert_eq!(Provider::parse("ollama"), Some(Provider::Ollama));
        assert_eq!(Provider::parse("bogus"), None);
    }

    #[test]
    fn identity_hashable_for_pool_keying() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(
            ClientIdentity::new(Provider::Ollama, "llama3:small"),
            "client-a",
        );
        assert_eq!(
            map.get(&ClientIdentity::new(Provider::Ollama, "llama3:small")),
            Some(&"client-a")
        );
    }
}
