//! Configuration loader
//!
//! Loads the sync subsystem configuration from environment variables or
//! files.
//!
//! ## Loading Strategy
//! 1. Reads a `.env` file into the process environment if one exists
//! 2. Attempts to load from environment variables
//! 3. If `FLAGSYNC_API_KEY` is absent, falls back to loading from file, with
//!    any `FLAGSYNC_*` variables still overriding the file's values
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `FLAGSYNC_API_KEY`: SDK key (required)
//! - `FLAGSYNC_SDK_URL`: Definitions API base URL
//! - `FLAGSYNC_AUTH_URL`: Auth API base URL
//! - `FLAGSYNC_STREAMING_URL`: Streaming endpoint
//! - `FLAGSYNC_STREAMING_ENABLED`: Whether to use the push stream (true/false)
//! - `FLAGSYNC_SPLITS_REFRESH_RATE`: Flag polling interval in seconds
//! - `FLAGSYNC_SEGMENTS_REFRESH_RATE`: Segment polling interval in seconds
//!
//! ## File Locations
//! The loader checks the following paths (in order):
//! 1. `./flagsync.toml`, `./flagsync.json`, `./config.toml`, `./config.json`
//! 2. The same names one and two directories up
//! 3. The same names next to the executable

use std::path::{Path, PathBuf};

use flagsync_domain::{Config, FlagSyncError, Result};

const API_KEY: &str = "FLAGSYNC_API_KEY";
const SDK_URL: &str = "FLAGSYNC_SDK_URL";
const AUTH_URL: &str = "FLAGSYNC_AUTH_URL";
const STREAMING_URL: &str = "FLAGSYNC_STREAMING_URL";
const STREAMING_ENABLED: &str = "FLAGSYNC_STREAMING_ENABLED";
const SPLITS_REFRESH_RATE: &str = "FLAGSYNC_SPLITS_REFRESH_RATE";
const SEGMENTS_REFRESH_RATE: &str = "FLAGSYNC_SEGMENTS_REFRESH_RATE";

const CONFIG_FILE_NAMES: [&str; 4] =
    ["flagsync.toml", "flagsync.json", "config.toml", "config.json"];

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns `FlagSyncError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - The result fails [`Config::validate`]
pub fn load() -> Result<Config> {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "Ignoring unreadable .env file"),
    }

    let config = match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            config
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            let mut config = load_from_file(None)?;
            apply_env_overrides(&mut config)?;
            config
        }
    };

    config.validate()?;
    Ok(config)
}

/// Load configuration from environment variables
///
/// Only `FLAGSYNC_API_KEY` is required; everything else keeps its default
/// when unset.
///
/// # Errors
/// Returns `FlagSyncError::Config` if the key is missing or a variable has an
/// invalid value.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::with_api_key(env_var(API_KEY)?);
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Overlay any `FLAGSYNC_*` variables that are set onto `config`.
///
/// # Errors
/// Returns `FlagSyncError::Config` for unparsable numeric values.
pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Some(key) = optional_env(API_KEY) {
        config.api_key = key;
    }
    if let Some(url) = optional_env(SDK_URL) {
        config.urls.sdk = url;
    }
    if let Some(url) = optional_env(AUTH_URL) {
        config.urls.auth = url;
    }
    if let Some(url) = optional_env(STREAMING_URL) {
        config.urls.streaming = url;
    }
    config.sync.streaming_enabled = env_bool(STREAMING_ENABLED, config.sync.streaming_enabled);
    if let Some(rate) = env_secs(SPLITS_REFRESH_RATE)? {
        config.sync.splits_refresh_rate_secs = rate;
    }
    if let Some(rate) = env_secs(SEGMENTS_REFRESH_RATE)? {
        config.sync.segments_refresh_rate_secs = rate;
    }
    Ok(())
}

/// Load configuration from a file
///
/// If `path` is `None`, searches multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension). Fields
/// the file leaves out keep their defaults.
///
/// # Errors
/// Returns `FlagSyncError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(FlagSyncError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => find_config_path().ok_or_else(|| {
            FlagSyncError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| FlagSyncError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration from string content, format chosen by extension.
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| FlagSyncError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| FlagSyncError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(FlagSyncError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// First existing configuration file among the known locations
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn find_config_path() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.extend([cwd.clone(), cwd.join(".."), cwd.join("../..")]);
    }
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.push(exe_dir.to_path_buf());
        }
    }

    roots
        .iter()
        .flat_map(|root| CONFIG_FILE_NAMES.iter().map(move |name| root.join(name)))
        .find(|path| path.exists())
}

fn env_var(key: &str) -> Result<String> {
    optional_env(key).ok_or_else(|| {
        FlagSyncError::Config(format!("Missing required environment variable: {key}"))
    })
}

/// Set and non-blank
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_secs(key: &str) -> Result<Option<u64>> {
    optional_env(key)
        .map(|value| {
            value.trim().parse::<u64>().map_err(|e| {
                FlagSyncError::Config(format!("Invalid value for {key} ('{value}'): {e}"))
            })
        })
        .transpose()
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
