//! Application configuration
//!
//! Backend base URL and Google client id, stored as JSON in the user config
//! directory. `SHOPCART_API_URL` overrides the configured base URL.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use url::Url;

const API_URL_ENV: &str = "SHOPCART_API_URL";

/// Default backend for local development
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend base URL, without a trailing slash
    pub api_base_url: String,

    /// Server client id used by the identity negotiation step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_client_id: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            google_client_id: None,
        }
    }
}

impl AppConfig {
    /// Parse and validate the configured base URL
    pub fn api_base(&self) -> Result<Url> {
        Url::parse(&self.api_base_url)
            .with_context(|| format!("Invalid api_base_url: {}", self.api_base_url))
    }
}

/// Get the path to the configuration file
pub fn config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().context("Cannot determine config directory")?;

    Ok(config_dir.join("shopcart").join("config.json"))
}

/// Load the configuration from disk
pub fn load_config() -> Result<AppConfig> {
    let mut config = read_config_file()?;

    if let Ok(url) = std::env::var(API_URL_ENV) {
        if !url.trim().is_empty() {
            config.api_base_url = url.trim().trim_end_matches('/').to_string();
        }
    }

    Ok(config)
}

fn read_config_file() -> Result<AppConfig> {
    let path = config_path()?;

    // If file doesn't exist, return default config
    if !path.exists() {
        return Ok(AppConfig::default());
    }

    let data = fs::read_to_string(&path).context("Failed to read config file")?;

    let config: AppConfig = serde_json::from_str(&data).context("Failed to parse config file")?;

    Ok(config)
}

/// Save the configuration to disk
pub fn save_config(config: &AppConfig) -> Result<()> {
    let path = config_path()?;

    // Create directory if it doesn't exist
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create config directory")?;
    }

    let data = serde_json::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(&path, data).context("Failed to write config file")?;

    // Write with user-only permissions
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(&path, perms)?;
    }

    Ok(())
}
