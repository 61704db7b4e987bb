//! Configuration loader and validator for the marketplace client.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub backend: Backend,
    #[serde(default)]
    pub auth: Auth,
    pub poller: Poller,
}

/// REST backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backend {
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Where the bearer token comes from. Both sources are optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Auth {
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub token_file: Option<String>,
}

/// Job-application poller settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Poller {
    pub interval_ms: u64,
    #[serde(default)]
    pub start_from: StartFrom,
}

/// Where a fresh poller places its cursor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StartFrom {
    /// Absorb whatever the first successful fetch returns as history.
    #[default]
    Latest,
    /// Replay every historical event as a notification.
    Beginning,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Config {
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        parse_base_url(&self.backend.base_url)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poller.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.backend.timeout_ms)
    }
}

/// Parse the base URL, forcing a trailing slash so `Url::join` keeps any path prefix.
fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };
    Url::parse(&with_slash).map_err(|_| ConfigError::Invalid("backend.base_url must be an absolute URL"))
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.backend.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("backend.base_url must be non-empty"));
    }
    parse_base_url(&cfg.backend.base_url)?;
    if cfg.backend.timeout_ms == 0 {
        return Err(ConfigError::Invalid("backend.timeout_ms must be > 0"));
    }
    if cfg.poller.interval_ms == 0 {
        return Err(ConfigError::Invalid("poller.interval_ms must be > 0"));
    }
    if let Some(var) = &cfg.auth.token_env {
        if var.trim().is_empty() {
            return Err(ConfigError::Invalid("auth.token_env must be non-empty when set"));
        }
    }
    if let Some(file) = &cfg.auth.token_file {
        if file.trim().is_empty() {
            return Err(ConfigError::Invalid("auth.token_file must be non-empty when set"));
        }
    }
    Ok(())
}

/// Returns the example YAML shipped with the CLI.
pub fn example() -> &'static str {
    r#"backend:
  base_url: "http://localhost:8000/"
  timeout_ms: 10000

auth:
  token_env: "ARCHHUB_TOKEN"
  token_file: "./data/token"

poller:
  interval_ms: 5000
  start_from: latest
"#
}
