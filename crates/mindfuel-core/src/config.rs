//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the
//! backend base URL, the web app origin, and the Spotify client
//! credentials. Environment variables override the file.
//!
//! Configuration is stored at `~/.config/mindfuel/config.json`.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::spotify::SpotifyConfig;

/// Application name used for config/data directory paths
const APP_NAME: &str = "mindfuel";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_APP_ORIGIN: &str = "http://localhost:3000";

pub const ENV_API_URL: &str = "MINDFUEL_API_URL";
pub const ENV_APP_ORIGIN: &str = "MINDFUEL_APP_ORIGIN";
pub const ENV_SPOTIFY_CLIENT_ID: &str = "SPOTIFY_CLIENT_ID";
pub const ENV_SPOTIFY_CLIENT_SECRET: &str = "SPOTIFY_CLIENT_SECRET";
pub const ENV_SPOTIFY_REDIRECT_URI: &str = "SPOTIFY_REDIRECT_URI";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_url: Option<String>,
    pub app_origin: Option<String>,
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
    pub spotify_redirect_uri: Option<String>,
    pub last_email: Option<String>,
}

impl Config {
    /// Load the config file, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_file() -> Result<Self> {
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

    /// Persist the last login email. Only the file's own values are written
    /// back, so environment overrides never land on disk.
    pub fn remember_email(email: &str) -> Result<()> {
        let mut on_disk = Self::load_file()?;
        on_disk.last_email = Some(email.to_string());
        on_disk.save()
    }

    /// Overwrite fields for which `lookup` yields a non-empty value.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_API_URL) {
            self.api_url = Some(v);
        }
        if let Some(v) = get(ENV_APP_ORIGIN) {
            self.app_origin = Some(v);
        }
        if let Some(v) = get(ENV_SPOTIFY_CLIENT_ID) {
            self.spotify_client_id = Some(v);
        }
        if let Some(v) = get(ENV_SPOTIFY_CLIENT_SECRET) {
            self.spotify_client_secret = Some(v);
        }
        if let Some(v) = get(ENV_SPOTIFY_REDIRECT_URI) {
            self.spotify_redirect_uri = Some(v);
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for the persisted token file and logs
    pub fn data_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn api_url(&self) -> String {
        self.api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    pub fn app_origin(&self) -> String {
        self.app_origin
            .clone()
            .unwrap_or_else(|| DEFAULT_APP_ORIGIN.to_string())
    }

    /// Spotify settings, if client credentials are configured
    pub fn spotify(&self) -> Option<SpotifyConfig> {
        let client_id = self.spotify_client_id.clone()?;
        let client_secret = self.spotify_client_secret.clone()?;
        Some(SpotifyConfig::new(
            client_id,
            client_secret,
            self.spotify_redirect_uri.clone(),
            &self.app_origin(),
        ))
    }
}
