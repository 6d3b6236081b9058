//! Configuration types module
//!
//! One struct per concern; every field has a default so partial files load.

pub mod realtime;
pub mod sandbox;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP listener
    #[serde(default)]
    pub server: ServerConfig,

    /// Session hub and connection settings
    #[serde(default)]
    pub realtime: realtime::RealtimeConfig,

    /// Credential check for HTTP and websocket clients
    #[serde(default)]
    pub auth: AuthConfig,

    /// Execution engine configuration
    #[serde(default)]
    pub sandbox: sandbox::SandboxConfig,

    /// Logging
    #[serde(default)]
    pub log: LogConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Authentication mode
    #[serde(default)]
    pub mode: AuthMode,
    /// Accepted bearer tokens (token mode)
    #[serde(default, skip_serializing)]
    pub tokens: Vec<SecretString>,
}

/// Authentication mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// No authentication (local development)
    #[default]
    None,
    /// Static bearer tokens
    Token,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level filter
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info,coderoom=debug".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.mode, AuthMode::None);
        assert_eq!(config.log.format, "pretty");
    }

    #[test]
    fn test_tokens_never_serialized() {
        let mut config = Config::default();
        config.auth.mode = AuthMode::Token;
        config.auth.tokens = vec![SecretString::from("s3cret")];

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("s3cret"));
        assert!(json.contains("\"mode\":\"token\""));
    }
}
