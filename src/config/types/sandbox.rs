//! Sandbox configuration types
//!
//! Configuration for the execution engine and its per-language runtimes
//! (Wasm modules and ephemeral containers).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Timeout applied when a request does not carry one
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub default_timeout: Duration,
    /// Upper bound for any requested timeout
    #[serde(with = "humantime_serde", default = "default_max_timeout")]
    pub max_timeout: Duration,
    /// Maximum captured bytes per output stream
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,
    /// Wasm runtime settings
    #[serde(default)]
    pub wasm: WasmConfig,
    /// Container runtime settings
    #[serde(default)]
    pub container: ContainerConfig,
    /// Language registry
    #[serde(default = "default_runtimes")]
    pub runtimes: Vec<RuntimeSpec>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            default_timeout: default_timeout(),
            max_timeout: default_max_timeout(),
            max_output_bytes: default_max_output(),
            wasm: WasmConfig::default(),
            container: ContainerConfig::default(),
            runtimes: default_runtimes(),
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_output() -> usize {
    1024 * 1024 // 1MB
}

fn default_runtimes() -> Vec<RuntimeSpec> {
    vec![
        RuntimeSpec::Wasm {
            language: "javascript".to_string(),
            artifact: PathBuf::from("quickjs.wasm"),
            args: Vec::new(),
        },
        RuntimeSpec::Wasm {
            language: "python".to_string(),
            artifact: PathBuf::from("python.wasm"),
            args: Vec::new(),
        },
        RuntimeSpec::Container {
            language: "go".to_string(),
            image: "golang:1.22-alpine".to_string(),
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "cat > /tmp/main.go && go run /tmp/main.go".to_string(),
            ],
        },
    ]
}

/// One entry of the language registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RuntimeSpec {
    /// A WASI command module that reads the program from stdin
    Wasm {
        /// Language identifier
        language: String,
        /// Module path, relative to `wasm.artifact_dir` unless absolute
        artifact: PathBuf,
        /// argv passed to the module (argv[0] defaults to the language)
        #[serde(default)]
        args: Vec<String>,
    },
    /// An ephemeral Docker container that reads the program from stdin
    Container {
        /// Language identifier
        language: String,
        /// Docker image, must already be present locally
        image: String,
        /// Command run inside the container
        command: Vec<String>,
    },
}

impl RuntimeSpec {
    /// Language this runtime serves
    pub fn language(&self) -> &str {
        match self {
            RuntimeSpec::Wasm { language, .. } | RuntimeSpec::Container { language, .. } => {
                language
            }
        }
    }
}

/// WebAssembly sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WasmConfig {
    /// Directory holding language modules
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    /// Linear memory cap per instance
    #[serde(default = "default_wasm_memory")]
    pub max_memory_bytes: usize,
    /// Epoch tick; guests yield to the scheduler at this granularity
    #[serde(with = "humantime_serde", default = "default_epoch_tick")]
    pub epoch_tick: Duration,
    /// Number of compiled modules kept in memory
    #[serde(default = "default_module_cache")]
    pub module_cache_capacity: u64,
}

impl Default for WasmConfig {
    fn default() -> Self {
        WasmConfig {
            artifact_dir: default_artifact_dir(),
            max_memory_bytes: default_wasm_memory(),
            epoch_tick: default_epoch_tick(),
            module_cache_capacity: default_module_cache(),
        }
    }
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("wasm")
}

fn default_wasm_memory() -> usize {
    256 * 1024 * 1024 // 256MB
}

fn default_epoch_tick() -> Duration {
    Duration::from_millis(10)
}

fn default_module_cache() -> u64 {
    8
}

/// Container (Docker) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Memory limit
    #[serde(default = "default_memory")]
    pub memory_limit: String,
    /// CPU limit (number of CPUs)
    #[serde(default = "default_cpu")]
    pub cpu_limit: f64,
    /// Maximum number of processes inside the container
    #[serde(default = "default_pids")]
    pub pids_limit: i64,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        ContainerConfig {
            memory_limit: default_memory(),
            cpu_limit: default_cpu(),
            pids_limit: default_pids(),
        }
    }
}

fn default_memory() -> String {
    "256m".to_string()
}

fn default_cpu() -> f64 {
    1.0
}

fn default_pids() -> i64 {
    64
}
