//! Server configuration loading.
//!
//! The configuration file is YAML, selected by the `WEBINK_CONFIG_PATH`
//! environment variable (default `webink.yaml`). It carries a `server`
//! section of tunables, all optional, and the `devices` list the
//! registry is built from.

use std::env;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, WebInkError};

/// Environment variable naming the configuration file.
pub const ENV_CONFIG_PATH: &str = "WEBINK_CONFIG_PATH";

/// Fallback configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "webink.yaml";

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server tunables. Every field has a default.
    #[serde(default)]
    pub server: ServerConfig,
    /// Registered devices. An empty list is a configuration error.
    pub devices: Vec<DeviceConfig>,
}

/// The `server:` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listener port.
    pub http_port: u16,
    /// Socket listener port.
    pub socket_port: u16,
    /// Number of headless-browser contexts in the render pool.
    pub browser_pool: usize,
    /// Maximum concurrently handled socket connections.
    pub max_socket_conns: usize,
    /// Seconds a render request may wait for a free browser context.
    pub pool_wait_secs: u64,
    /// Hard ceiling in seconds for page navigation.
    pub navigation_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8000,
            socket_port: 8091,
            browser_pool: 2,
            max_socket_conns: 64,
            pool_wait_secs: 30,
            navigation_secs: 20,
        }
    }
}

/// One entry of the `devices:` list.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Opaque unique device id.
    pub id: String,
    /// Shared API key presented by the firmware.
    pub api_key: String,
    /// Page the device displays; rendered by the dashboard service.
    pub url: String,
    /// Canonical `WxHxBxC` display mode string.
    pub mode: String,
    /// Seconds a captured snapshot stays fresh.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Seconds the firmware sleeps between polls.
    #[serde(default = "default_sleep_duration")]
    pub sleep_duration: u64,
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_sleep_duration() -> u64 {
    300
}

/// Resolves the configuration path from the environment.
#[must_use]
pub fn config_path() -> String {
    env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

/// Loads and validates the configuration file.
///
/// # Errors
///
/// Returns `WebInkError::Config` when the file is unreadable, fails to
/// parse, or declares no devices. These are fatal at startup.
pub fn load(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| WebInkError::Config(format!("{}: {e}", path.display())))?;
    parse(&text)
}

/// Parses a configuration document from a YAML string.
pub fn parse(text: &str) -> Result<Config> {
    let config: Config =
        serde_yaml::from_str(text).map_err(|e| WebInkError::Config(e.to_string()))?;
    if config.devices.is_empty() {
        return Err(WebInkError::Config("no devices configured".to_string()));
    }
    if config.server.browser_pool == 0 {
        return Err(WebInkError::Config("browser_pool must be > 0".to_string()));
    }
    Ok(config)
}
