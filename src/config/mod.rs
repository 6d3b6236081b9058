//! Configuration module - Modular configuration management
//!
//! Configuration is split into focused modules:
//! - types/mod.rs: Core configuration types (Config, ServerConfig, AuthConfig, LogConfig)
//! - types/realtime.rs: Session hub and connection timers
//! - types/sandbox.rs: Execution engine and runtime registry
//! - io.rs: Configuration loading
//! - validation.rs: Configuration validation
//! - paths.rs: Configuration file paths

mod io;
mod paths;
mod types;
mod validation;

// Re-export core config types
pub use types::{AuthConfig, AuthMode, Config, LogConfig, ServerConfig};

// Re-export realtime types
pub use types::realtime::RealtimeConfig;

// Re-export sandbox types
pub use types::sandbox::{ContainerConfig, RuntimeSpec, SandboxConfig, WasmConfig};

// Re-export IO and utilities
pub use io::{apply_env_overrides, load_config_from_path, load_config_with};
pub use paths::{config_dir, config_path};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
