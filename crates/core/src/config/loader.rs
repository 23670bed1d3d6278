//! Configuration loader
//!
//! Loads engine configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If incomplete, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `SHIPYARD_RETRY_MAX_HISTORY`: Attempt records kept per operation
//!   (required)
//! - `SHIPYARD_RETRY_LEARNING`: Whether adaptive learning is enabled
//! - `SHIPYARD_RETRY_LEARNING_RATE`: EMA learning rate in `(0, 1]`
//! - `SHIPYARD_RETRY_DEFAULT_POLICIES`: Register the built-in policies
//! - `SHIPYARD_RETRY_DEFAULT_FALLBACKS`: Register the built-in fallback chains
//!
//! Policies and fallback chains can only be defined in files.
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./shipyard.toml` or `./shipyard.json` (current working directory)
//! 2. `./resilience.toml` or `./resilience.json` (current working directory)
//! 3. The same names relative to the executable location

use std::path::{Path, PathBuf};

use shipyard_common::error::CommonError;

use super::EngineConfig;
use crate::error::EngineResult;

const CONFIG_FILE_NAMES: [&str; 4] =
    ["shipyard.toml", "shipyard.json", "resilience.toml", "resilience.json"];

fn config_error(message: String) -> crate::error::EngineError {
    CommonError::config(message).into()
}

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If any required
/// variables are missing, falls back to loading from a config file.
///
/// # Errors
/// Returns a configuration error if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
pub fn load() -> EngineResult<EngineConfig> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// # Errors
/// Returns a configuration error if `SHIPYARD_RETRY_MAX_HISTORY` is missing
/// or a numeric variable does not parse.
pub fn load_from_env() -> EngineResult<EngineConfig> {
    let max_history_size = env_var("SHIPYARD_RETRY_MAX_HISTORY").and_then(|s| {
        s.parse::<usize>().map_err(|e| config_error(format!("Invalid max history size: {}", e)))
    })?;

    let defaults = EngineConfig::default();
    let learning_rate = match std::env::var("SHIPYARD_RETRY_LEARNING_RATE").ok() {
        Some(s) => s
            .parse::<f64>()
            .map_err(|e| config_error(format!("Invalid learning rate: {}", e)))?,
        None => defaults.learning_rate,
    };

    Ok(EngineConfig {
        max_history_size,
        learning_enabled: env_bool("SHIPYARD_RETRY_LEARNING", defaults.learning_enabled),
        learning_rate,
        default_policies: env_bool("SHIPYARD_RETRY_DEFAULT_POLICIES", defaults.default_policies),
        default_fallbacks: env_bool(
            "SHIPYARD_RETRY_DEFAULT_FALLBACKS",
            defaults.default_fallbacks,
        ),
        ..defaults
    })
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations. The format is
/// detected by file extension.
///
/// # Errors
/// Returns a configuration error if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> EngineResult<EngineConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(config_error(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            config_error("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| config_error(format!("Failed to read config file: {}", e)))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration from string content, `.json` when unrecognized
fn parse_config(contents: &str, path: &Path) -> EngineResult<EngineConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| config_error(format!("Invalid TOML format: {}", e))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| config_error(format!("Invalid JSON format: {}", e))),
        _ => Err(config_error(format!("Unsupported config format: {}", extension))),
    }
}

/// Probe the standard locations for a configuration file
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        candidates.extend(CONFIG_FILE_NAMES.iter().map(|name| cwd.join(name)));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.extend(CONFIG_FILE_NAMES.iter().map(|name| exe_dir.join(name)));
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

/// Get required environment variable
fn env_var(key: &str) -> EngineResult<String> {
    std::env::var(key)
        .map_err(|_| config_error(format!("Missing required environment variable: {}", key)))
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
