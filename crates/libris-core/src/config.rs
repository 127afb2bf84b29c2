//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the API
//! base URL, transport timeouts and retry budget, session timing, and which
//! storage backend holds credentials.
//!
//! Configuration is stored at `~/.config/libris/config.json`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "libris";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `api_base_url`
pub const API_URL_ENV: &str = "LIBRIS_API_URL";

/// Environment variable overriding `storage`
pub const STORAGE_ENV: &str = "LIBRIS_STORAGE";

/// Where the credential store keeps its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// JSON file in the cache directory
    #[default]
    File,
    /// OS keychain
    Keyring,
    /// Process memory only; nothing survives a restart
    Memory,
}

impl FromStr for StorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StorageKind::File),
            "keyring" => Ok(StorageKind::Keyring),
            "memory" => Ok(StorageKind::Memory),
            other => Err(anyhow::anyhow!("Unknown storage kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    /// Per-request timeout. 30s covers slow backends while still failing
    /// fast enough to be retried.
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// How close to expiry a token must be before `refresh_session` renews it
    pub refresh_threshold_secs: u64,
    /// Period of the background session revalidation
    pub revalidate_interval_secs: u64,
    pub login_path: String,
    pub landing_path: String,
    pub storage: StorageKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            request_timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            refresh_threshold_secs: 300,
            revalidate_interval_secs: 300,
            login_path: "/login".to_string(),
            landing_path: "/".to_string(),
            storage: StorageKind::File,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `LIBRIS_*` environment overrides on top of the loaded values.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().to_string();
            }
        }
        if let Ok(kind) = std::env::var(STORAGE_ENV) {
            self.storage = kind.parse()?;
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.refresh_threshold_secs)
    }

    pub fn revalidate_interval(&self) -> Duration {
        Duration::from_secs(self.revalidate_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.revalidate_interval(), Duration::from_secs(300));
        assert_eq!(config.storage, StorageKind::File);
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"api_base_url": "https://books.example/api", "storage": "keyring"}"#)
                .expect("partial config should parse");
        assert_eq!(config.api_base_url, "https://books.example/api");
        assert_eq!(config.storage, StorageKind::Keyring);
        assert_eq!(config.login_path, "/login");
        assert_eq!(config.retry_base_delay_ms, 1000);
    }

    #[test]
    fn test_saved_settings_are_loaded_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        assert_eq!(Config::load_from(&path).unwrap().storage, StorageKind::File);

        let config = Config {
            api_base_url: "https://books.example/api".to_string(),
            storage: StorageKind::Memory,
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.api_base_url, "https://books.example/api");
        assert_eq!(loaded.storage, StorageKind::Memory);
    }

    #[test]
    fn test_storage_kind_from_str() {
        assert_eq!("FILE".parse::<StorageKind>().unwrap(), StorageKind::File);
        assert_eq!(" memory ".parse::<StorageKind>().unwrap(), StorageKind::Memory);
        assert!("cookie".parse::<StorageKind>().is_err());
    }
}
