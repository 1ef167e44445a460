// Unidrive Configuration Module
// Persistent client configuration: OAuth clients, API endpoints, HTTP policy

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::providers::http_retry::HttpRetryConfig;
use crate::providers::{google_drive, onedrive};

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Companion service that redeems Google authorization codes
    pub oauth_backend_url: String,
    /// Redirect URI registered with every OAuth client
    pub redirect_uri: String,
    pub google_client_id: String,
    pub onedrive_client_id: String,
    pub dropbox_app_key: String,
    pub dropbox_app_secret: Option<String>,
    pub google_api_base: String,
    pub google_upload_base: String,
    pub google_userinfo_url: String,
    pub onedrive_graph_base: String,
    /// Drive page size (all pages are drained)
    pub google_page_size: u32,
    /// Graph page size ("load more" granularity)
    pub onedrive_page_size: u32,
    pub http_timeout_secs: u64,
    /// Retries for idempotent reads on 429/5xx
    pub max_retries: u32,
    /// tracing level filter: error, warn, info, debug, trace
    pub log_level: String,
    /// Where remembered accounts are kept; defaults next to the config file
    pub credentials_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            oauth_backend_url: "http://localhost:4000".to_string(),
            redirect_uri: "http://127.0.0.1:8765/callback".to_string(),
            google_client_id: String::new(),
            onedrive_client_id: String::new(),
            dropbox_app_key: String::new(),
            dropbox_app_secret: None,
            google_api_base: google_drive::DRIVE_API_BASE.to_string(),
            google_upload_base: google_drive::UPLOAD_API_BASE.to_string(),
            google_userinfo_url: google_drive::USERINFO_URL.to_string(),
            onedrive_graph_base: onedrive::GRAPH_API_BASE.to_string(),
            google_page_size: 100,
            onedrive_page_size: 25,
            http_timeout_secs: 15,
            max_retries: 3,
            log_level: "info".to_string(),
            credentials_file: None,
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("unidrive")
}

impl AppConfig {
    /// `<config dir>/unidrive/config.json`
    pub fn default_path() -> PathBuf {
        config_dir().join("config.json")
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.credentials_file
            .clone()
            .unwrap_or_else(|| config_dir().join("credentials.json"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default path; a missing or broken file yields defaults.
    pub fn load_or_default() -> Self {
        let path = Self::default_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Using default config: {:#}", e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).with_context(|| format!("Failed to write config {}", path.display()))?;
        tracing::info!("Config saved to {:?}", path);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("oauth_backend_url", &self.oauth_backend_url),
            ("redirect_uri", &self.redirect_uri),
            ("google_api_base", &self.google_api_base),
            ("onedrive_graph_base", &self.onedrive_graph_base),
        ] {
            url::Url::parse(value).with_context(|| format!("{} is not a valid URL: {}", name, value))?;
        }
        if self.http_timeout_secs == 0 {
            bail!("http_timeout_secs must be greater than zero");
        }
        if self.google_page_size == 0 || self.onedrive_page_size == 0 {
            bail!("page sizes must be greater than zero");
        }
        Ok(())
    }

    pub fn retry_config(&self) -> HttpRetryConfig {
        HttpRetryConfig::with_max_retries(self.max_retries)
    }

    /// Install the log subscriber at `log_level`; see `crate::init_logging`.
    pub fn init_logging(&self) -> bool {
        crate::init_logging(&self.log_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.google_page_size, 100);
        assert_eq!(config.onedrive_page_size, 25);
        assert_eq!(config.http_timeout_secs, 15);
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_config().max_retries, 3);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let json = r#"{"google_client_id":"abc.apps.googleusercontent.com","max_retries":0}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.google_client_id, "abc.apps.googleusercontent.com");
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.oauth_backend_url, "http://localhost:4000");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = AppConfig {
            onedrive_client_id: "od-client".to_string(),
            log_level: "debug".to_string(),
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        fs::write(&path, "{not json").unwrap();
        let err = AppConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config"));

        fs::write(&path, r#"{"http_timeout_secs":0}"#).unwrap();
        assert!(AppConfig::load(&path).is_err());

        assert!(AppConfig::load(&dir.path().join("missing.json")).is_err());
    }
}
