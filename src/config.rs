use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::geolocate::{DEFAULT_TIMEOUT, GOOGLE_GEOLOCATION_API_URL};

pub const API_KEY_VAR: &str = "GOOGLE_GEOLOCATION_API_KEY";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub http_port: u16,

    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    // only entities with this prefix are auto-geolocated and accept positions
    #[serde(default = "default_tracker_prefix")]
    pub tracker_prefix: String,

    #[serde(default)]
    pub provider: ProviderConfig,
}

#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ProviderConfig {
    /// Configured key, else `GOOGLE_GEOLOCATION_API_KEY` from the environment
    /// or a `.env` file.
    pub fn api_key(&self) -> Result<String> {
        match &self.api_key {
            Some(x) => Ok(x.clone()),
            None => dotenvy::var(API_KEY_VAR)
                .with_context(|| format!("No provider api_key configured and {API_KEY_VAR} is not set")),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("wifi_geolocation.json")
}

fn default_tracker_prefix() -> String {
    "device_tracker.".to_string()
}

fn default_endpoint() -> String {
    GOOGLE_GEOLOCATION_API_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

pub fn load(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path).context("Failed to read config")?;
    parse(&data)
}

fn parse(data: &str) -> Result<Config> {
    let config = toml::from_str(data).context("Failed to parse config")?;
    Ok(config)
}
