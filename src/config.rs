//! Configuration for spoolsync.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (SPOOLSYNC_MOONRAKER_URL, SPOOLSYNC_SPOOLMAN_URL,
//!    SPOOLSYNC_MACRO, SPOOLSYNC_API_KEY)
//! 2. Config file (YAML)
//! 3. Defaults (local Moonraker and Spoolman, macro SPOOLMAN_VARS)
//!
//! Config file discovery:
//! - An explicit `--config` path wins
//! - Otherwise searches current directory and parents for .spoolsync/config.yaml
//! - Finally falls back to <config dir>/spoolsync/config.yaml

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::RetryPolicy;

pub const ENV_MOONRAKER_URL: &str = "SPOOLSYNC_MOONRAKER_URL";
pub const ENV_SPOOLMAN_URL: &str = "SPOOLSYNC_SPOOLMAN_URL";
pub const ENV_MACRO: &str = "SPOOLSYNC_MACRO";
pub const ENV_API_KEY: &str = "SPOOLSYNC_API_KEY";

const DEFAULT_MOONRAKER_URL: &str = "http://localhost:7125";
const DEFAULT_SPOOLMAN_URL: &str = "http://localhost:7912";
const DEFAULT_MACRO: &str = "SPOOLMAN_VARS";
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5000;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub moonraker: MoonrakerConfig,
    #[serde(default)]
    pub spoolman: SpoolmanConfig,
    /// Name of the gcode_macro holding the variables
    #[serde(default)]
    pub macro_name: Option<String>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    /// Bound on each SET_GCODE_VARIABLE call in milliseconds
    #[serde(default)]
    pub write_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MoonrakerConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpoolmanConfig {
    pub url: Option<String>,
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Moonraker base URL (no trailing slash)
    pub moonraker_url: String,
    /// Moonraker API key, if required
    pub moonraker_api_key: Option<String>,
    /// Spoolman base URL (no trailing slash)
    pub spoolman_url: String,
    /// Target gcode_macro
    pub macro_name: String,
    /// Fetch retry policy
    pub retry: RetryPolicy,
    /// Bound on each macro variable write
    pub write_timeout_ms: u64,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Validate resolved values
    pub fn validate(&self) -> Result<()> {
        if self.macro_name.trim().is_empty() {
            anyhow::bail!("macro_name cannot be empty");
        }
        if self.macro_name.contains(char::is_whitespace) {
            anyhow::bail!("macro_name cannot contain whitespace: '{}'", self.macro_name);
        }
        if self.moonraker_url.is_empty() {
            anyhow::bail!("Moonraker URL cannot be empty");
        }
        if self.spoolman_url.is_empty() {
            anyhow::bail!("Spoolman URL cannot be empty");
        }
        if self.write_timeout_ms == 0 {
            anyhow::bail!("write_timeout_ms must be greater than 0");
        }
        self.retry.validate()
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    if let Ok(mut current) = std::env::current_dir() {
        loop {
            let config_path = current.join(".spoolsync").join("config.yaml");
            if config_path.exists() {
                return Some(config_path);
            }

            if !current.pop() {
                break;
            }
        }
    }

    let user_config = dirs::config_dir()?.join("spoolsync").join("config.yaml");
    user_config.exists().then_some(user_config)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse config YAML content
pub fn parse_config(content: &str) -> Result<ConfigFile> {
    if content.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Merge file values, environment and defaults
fn resolve<F>(file: ConfigFile, config_file: Option<PathBuf>, env: F) -> ResolvedConfig
where
    F: Fn(&str) -> Option<String>,
{
    let moonraker_url = env(ENV_MOONRAKER_URL)
        .or(file.moonraker.url)
        .unwrap_or_else(|| DEFAULT_MOONRAKER_URL.to_string());

    let spoolman_url = env(ENV_SPOOLMAN_URL)
        .or(file.spoolman.url)
        .unwrap_or_else(|| DEFAULT_SPOOLMAN_URL.to_string());

    let macro_name = env(ENV_MACRO)
        .or(file.macro_name)
        .unwrap_or_else(|| DEFAULT_MACRO.to_string());

    ResolvedConfig {
        moonraker_url: normalize_url(&moonraker_url),
        moonraker_api_key: env(ENV_API_KEY).or(file.moonraker.api_key),
        spoolman_url: normalize_url(&spoolman_url),
        macro_name: macro_name.trim().to_string(),
        retry: file.retry.unwrap_or_default(),
        write_timeout_ms: file.write_timeout_ms.unwrap_or(DEFAULT_WRITE_TIMEOUT_MS),
        config_file,
    }
}

/// Load configuration from all sources
pub fn load_config(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    let config_file = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(),
    };

    let file = match config_file {
        Some(ref path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    let config = resolve(file, config_file, |key| {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    });
    config.validate()?;
    Ok(config)
}
