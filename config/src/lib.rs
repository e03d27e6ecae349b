mod oauth_store;
mod path;
mod schema;
mod store;

pub use oauth_store::{ConfigTokenStore, OAuthClientCredentials};
pub use path::{config_dir, config_path, data_dir, expand_vars};
pub use schema::{Config, IndexerSettings, OAuthTokens, ProviderConfig};
pub use store::{ConfigError, Result, load, load_default, save};
