//! Load and persist [`Config`] as TOML, expanding `${VAR}` references in
//! the raw text before parsing.

use std::path::{Path, PathBuf};

use forge_utils::atomic_write;

use crate::path::expand_vars;
use crate::schema::Config;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no config directory could be determined")]
    NoConfigDir,
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Load the config at `path`. A missing file is not an error — it
/// resolves to [`Config::default`], since `forge` runs with built-in
/// defaults until a user writes a config file.
pub fn load(path: &Path) -> Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let expanded = expand_vars(&raw);
            Ok(toml::from_str(&expanded)?)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub fn save(path: &Path, config: &Config) -> Result<()> {
    let toml_text = toml::to_string_pretty(config)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    atomic_write(path, toml_text.as_bytes()).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the config from the default discovered location.
pub fn load_default() -> Result<Config> {
    let path = crate::path::config_path().ok_or(ConfigError::NoConfigDir)?;
    load(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ProviderConfig;

    #[test]
    fn missing_file_loads_as_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load(&dir.path().join("nope.toml")).expect("load");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.providers.insert(
            "ollama".to_string(),
            ProviderConfig {
                base_url: Some("http://localhost:11434".to_string()),
                ..Default::default()
            },
        );
        save(&path, &config).expect("save");

        let reloaded = load(&path).expect("load");
        assert_eq!(reloaded, config);
    }

    #[test]
    fn env_var_is_expanded_on_load() {
        unsafe { std::env::set_var("FORGE_OLLAMA_KEY", "expanded-key") };
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[providers.ollama]\napi_key = \"${FORGE_OLLAMA_KEY}\"\n").expect("write");

        let config = load(&path).expect("load");
        assert_eq!(config.provider("ollama").and_then(|p| p.api_key.clone()), Some("expanded-key".to_string()));
        unsafe { std::env::remove_var("FORGE_OLLAMA_KEY") };
    }
}
