//! Configuration I/O - Loading configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::{Path, PathBuf};

use secrecy::SecretString;

use super::types::{AuthMode, Config};
use crate::error::{Error, Result};

/// Load configuration with layered precedence:
/// 1. Config file (config.json / config.toml) if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
///
/// An explicit path that does not exist is an error; the default one is optional.
pub fn load_config_with(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => load_config_from_path(path)?,
        None => {
            let default_path = super::paths::config_path();
            if default_path.exists() {
                load_config_from_path(&default_path)?
            } else {
                Config::default()
            }
        }
    };

    // Environment variables have the highest precedence
    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    // Detect format by extension
    let config: Config = if path.extension().is_some_and(|ext| ext == "json") {
        // Parse as JSON5 (more lenient than strict JSON)
        json5::from_str(&content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        // Try JSON5 first, then TOML
        json5::from_str(&content)
            .or_else(|_| toml::from_str(&content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

/// Apply environment variable overrides to an existing config.
///
/// Loads `.env` first so local development does not need exported variables.
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();
    apply_overrides(config, |key| std::env::var(key).ok());
}

/// Overlay values from `lookup` onto `config`. Unparseable values are ignored.
fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    // Server overrides
    if let Some(bind) = lookup("CODEROOM_BIND") {
        config.server.bind = bind;
    }
    if let Some(port) = lookup("CODEROOM_PORT").or_else(|| lookup("PORT")) {
        if let Ok(port) = port.parse() {
            config.server.port = port;
        }
    }

    // Auth overrides
    if let Some(tokens) = lookup("CODEROOM_AUTH_TOKENS") {
        let tokens: Vec<SecretString> = tokens
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(SecretString::from)
            .collect();
        if !tokens.is_empty() {
            config.auth.mode = AuthMode::Token;
            config.auth.tokens = tokens;
        }
    }

    // Sandbox overrides
    if let Some(dir) = lookup("CODEROOM_WASM_DIR") {
        config.sandbox.wasm.artifact_dir = PathBuf::from(dir);
    }

    // Logging overrides
    if let Some(level) = lookup("RUST_LOG") {
        config.log.level = level;
    }
    if let Some(format) = lookup("LOG_FORMAT") {
        config.log.format = format;
    }
}
