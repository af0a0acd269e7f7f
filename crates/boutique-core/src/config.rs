//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! the auth API base URL, session timing and where the session is stored.
//!
//! Configuration is stored at `~/.config/boutique/config.json`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::store::{FileStore, KeyValueStore, KeyringStore};

/// Application name used for config/data directory paths
const APP_NAME: &str = "boutique";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default auth API location
const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";

/// Renewal period. Access tokens live for 10 minutes; renewing at 9 keeps
/// one minute of slack for a slow round-trip.
const DEFAULT_RENEWAL_INTERVAL_SECS: u64 = 9 * 60;

/// How long a passcode may be entered when the server does not say
const DEFAULT_OTP_TTL_SECS: u64 = 5 * 60;

/// HTTP request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Where session keys are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    File,
    Keyring,
}

impl std::str::FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StoreBackend::File),
            "keyring" | "keychain" => Ok(StoreBackend::Keyring),
            other => Err(anyhow::anyhow!("Unknown store backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub renewal_interval_secs: u64,
    pub otp_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub store_backend: StoreBackend,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            renewal_interval_secs: DEFAULT_RENEWAL_INTERVAL_SECS,
            otp_ttl_secs: DEFAULT_OTP_TTL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            store_backend: StoreBackend::default(),
            last_email: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Apply `BOUTIQUE_API_URL` and `BOUTIQUE_STORE` overrides
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("BOUTIQUE_API_URL") {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().to_string();
            }
        }
        if let Ok(backend) = std::env::var("BOUTIQUE_STORE") {
            self.store_backend = backend.parse()?;
        }
        Ok(())
    }

    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_secs.max(1))
    }

    pub fn otp_ttl(&self) -> Duration {
        Duration::from_secs(self.otp_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Open the configured persistent store
    pub fn open_store(&self) -> Result<Arc<dyn KeyValueStore>> {
        Ok(match self.store_backend {
            StoreBackend::File => Arc::new(FileStore::in_dir(&self.data_dir()?)),
            StoreBackend::Keyring => Arc::new(KeyringStore::default()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_session_timing() {
        let config = Config::default();
        assert_eq!(config.renewal_interval(), Duration::from_secs(540));
        assert_eq!(config.otp_ttl(), Duration::from_secs(300));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.store_backend, StoreBackend::File);
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let raw = r#"{"api_base_url":"https://shop.example/api","store_backend":"keyring"}"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.api_base_url, "https://shop.example/api");
        assert_eq!(config.store_backend, StoreBackend::Keyring);
        assert_eq!(config.renewal_interval_secs, DEFAULT_RENEWAL_INTERVAL_SECS);
    }

    #[test]
    fn test_store_backend_parse() {
        assert_eq!("File".parse::<StoreBackend>().unwrap(), StoreBackend::File);
        assert_eq!("keychain".parse::<StoreBackend>().unwrap(), StoreBackend::Keyring);
        assert!("redis".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_zero_renewal_interval_is_clamped() {
        let config = Config {
            renewal_interval_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.renewal_interval(), Duration::from_secs(1));
    }
}
