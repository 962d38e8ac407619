use std::path::PathBuf;
use std::time::Duration;

use eyre::Result;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::capture::DEFAULT_LOOKUP_TIMEOUT;
use crate::storage::KeyValueStore;
use crate::submit::{AUTH_TOKEN_KEY, BACKEND_URL_KEY};

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub default_lang: Option<String>,
    pub default_format: Option<String>,
    pub backend_url: Option<String>,
    pub auth_token: Option<String>,
    pub token_lookup_timeout_ms: Option<u64>,
    pub token_max_age_secs: Option<u64>,
    pub user_agent: Option<String>,
}

impl Config {
    /// Load config from ~/.config/subgrab/config.toml if it exists
    pub fn load() -> Result<Self> {
        let path = config_path();
        if path.exists() {
            debug!("Loading config from {}", path.display());
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            debug!("No config file found at {}", path.display());
            Ok(Config::default())
        }
    }

    pub fn token_lookup_timeout(&self) -> Duration {
        self.token_lookup_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_LOOKUP_TIMEOUT)
    }

    pub fn token_max_age(&self) -> Option<Duration> {
        self.token_max_age_secs.map(Duration::from_secs)
    }

    /// Copy the backend settings into the key-value store the submission sink reads
    pub fn seed(&self, store: &dyn KeyValueStore) {
        if let Some(ref url) = self.backend_url {
            store.set(BACKEND_URL_KEY, url);
        }
        if let Some(ref token) = self.auth_token {
            store.set(AUTH_TOKEN_KEY, token);
        }
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("subgrab")
        .join("config.toml")
}
