//! Configuration validation
//!
//! Validates configuration and reports issues.

use std::collections::HashSet;

use super::types::sandbox::RuntimeSpec;
use super::types::{AuthMode, Config};

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_realtime_config(config, result);
    result = validate_auth_config(config, result);
    result = validate_sandbox_config(config, result);

    result
}

fn validate_realtime_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let realtime = &config.realtime;

    if realtime.ping_interval >= realtime.read_timeout {
        result = result.with_error(
            ValidationIssue::new(
                "realtime.ping_interval",
                format!(
                    "Ping interval ({:?}) must be shorter than read timeout ({:?})",
                    realtime.ping_interval, realtime.read_timeout
                ),
            )
            .with_suggestion("Use 9/10 of realtime.read_timeout"),
        );
    }

    if realtime.queue_capacity == 0 {
        result = result.with_error(ValidationIssue::new(
            "realtime.queue_capacity",
            "Outbound queue capacity must be at least 1",
        ));
    }

    if realtime.hub_command_capacity == 0 {
        result = result.with_error(ValidationIssue::new(
            "realtime.hub_command_capacity",
            "Hub command capacity must be at least 1",
        ));
    }

    result
}

fn validate_auth_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    match config.auth.mode {
        AuthMode::Token if config.auth.tokens.is_empty() => {
            result = result.with_error(
                ValidationIssue::new("auth.tokens", "Token mode selected but no tokens configured")
                    .with_suggestion("Set CODEROOM_AUTH_TOKENS or auth.tokens"),
            );
        }
        AuthMode::None => {
            result = result.with_warning(
                ValidationIssue::new("auth.mode", "Authentication disabled; every client is accepted")
                    .with_suggestion("Set CODEROOM_AUTH_TOKENS outside local development"),
            );
        }
        AuthMode::Token => {}
    }

    result
}

fn validate_sandbox_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let sandbox = &config.sandbox;

    if sandbox.default_timeout > sandbox.max_timeout {
        result = result.with_warning(ValidationIssue::new(
            "sandbox.default_timeout",
            "Default timeout exceeds max timeout and will be clamped",
        ));
    }

    let mut seen = HashSet::new();
    for spec in &sandbox.runtimes {
        if !seen.insert(spec.language().to_lowercase()) {
            result = result.with_error(ValidationIssue::new(
                "sandbox.runtimes",
                format!("Language '{}' is registered more than once", spec.language()),
            ));
        }

        // Missing artifacts degrade to placeholders, so this is only a warning
        if let RuntimeSpec::Wasm { language, artifact, .. } = spec {
            let path = sandbox.wasm.artifact_dir.join(artifact);
            if !path.exists() {
                result = result.with_warning(
                    ValidationIssue::new(
                        "sandbox.runtimes",
                        format!("Wasm module for '{}' not found at {}", language, path.display()),
                    )
                    .with_suggestion("Place the module there or set CODEROOM_WASM_DIR"),
                );
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        let result = validate_config(&config);

        // Default config should have warnings but no errors
        assert!(result.errors.is_empty());
        assert!(result.valid);
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn test_ping_interval_must_be_shorter() {
        let mut config = Config::default();
        config.realtime.ping_interval = Duration::from_secs(60);

        let result = validate_config(&config);
        assert!(!result.valid);
        assert_eq!(result.errors[0].path, "realtime.ping_interval");
    }

    #[test]
    fn test_duplicate_language() {
        let mut config = Config::default();
        config.sandbox.runtimes.push(RuntimeSpec::Wasm {
            language: "Python".to_string(),
            artifact: PathBuf::from("other.wasm"),
            args: Vec::new(),
        });

        let result = validate_config(&config);
        assert!(result
            .errors
            .iter()
            .any(|issue| issue.message.contains("registered more than once")));
    }

    #[test]
    fn test_token_mode_without_tokens() {
        let mut config = Config::default();
        config.auth.mode = AuthMode::Token;

        let result = validate_config(&config);
        assert!(result.errors.iter().any(|issue| issue.path == "auth.tokens"));
    }
}
