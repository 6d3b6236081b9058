//! Execution engine
//!
//! A closed registry mapping language identifiers to sandbox runtimes. The
//! registry is built once and never mutated, so one engine is shared by every
//! request handler without locking.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{RuntimeSpec, SandboxConfig};
use crate::error::{Error, Result};
use crate::sandbox::container::ContainerRuntime;
use crate::sandbox::runtime::{combine_streams, RunOutput, SandboxRuntime};
use crate::sandbox::wasm::{WasmHost, WasmRuntime};

/// Request to execute code
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// The program text
    #[serde(alias = "code")]
    pub source_text: String,
    /// Language identifier
    #[serde(alias = "language")]
    pub language_id: String,
    /// Requested timeout, clamped to the configured maximum
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ExecutionRequest {
    /// Create a new execution request
    pub fn new(source_text: impl Into<String>, language_id: impl Into<String>) -> Self {
        ExecutionRequest {
            source_text: source_text.into(),
            language_id: language_id.into(),
            timeout_ms: None,
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }
}

/// Result of code execution, as returned to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Whether execution was successful
    pub success: bool,
    /// Captured output (stdout, then stderr)
    pub output: String,
    /// Error description for failed runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time spent in the engine
    pub elapsed_ms: u64,
    /// Was execution terminated due to timeout?
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
    /// The sandbox was unavailable and the output is a stand-in
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub placeholder: bool,
}

impl ExecutionResult {
    /// Build the client-facing result from an engine outcome
    pub fn from_outcome(outcome: Result<RunOutput>, elapsed: Duration) -> Self {
        let elapsed_ms = elapsed.as_millis() as u64;
        match outcome {
            Ok(output) => ExecutionResult {
                success: true,
                output: output.combined_output(),
                error: None,
                elapsed_ms,
                timed_out: false,
                placeholder: output.is_placeholder(),
            },
            Err(Error::Runtime { message, stderr }) => ExecutionResult {
                success: false,
                output: combine_streams("", &stderr),
                error: Some(message),
                elapsed_ms,
                timed_out: false,
                placeholder: false,
            },
            Err(err) => ExecutionResult {
                success: false,
                output: String::new(),
                timed_out: err.is_timeout(),
                error: Some(err.to_string()),
                elapsed_ms,
                placeholder: false,
            },
        }
    }
}

/// Map common aliases onto registry keys
pub fn normalize_language(id: &str) -> String {
    let id = id.trim().to_lowercase();
    match id.as_str() {
        "js" | "node" | "nodejs" => "javascript".to_string(),
        "py" | "python3" => "python".to_string(),
        "golang" => "go".to_string(),
        _ => id,
    }
}

/// Registry of sandbox runtimes keyed by language
pub struct ExecutionEngine {
    runtimes: HashMap<String, Arc<dyn SandboxRuntime>>,
    default_timeout: Duration,
    max_timeout: Duration,
}

impl ExecutionEngine {
    /// Create an empty engine
    pub fn new(default_timeout: Duration, max_timeout: Duration) -> Self {
        ExecutionEngine {
            runtimes: HashMap::new(),
            default_timeout,
            max_timeout,
        }
    }

    /// Register a runtime for a language
    pub fn with_runtime(mut self, language: &str, runtime: Arc<dyn SandboxRuntime>) -> Self {
        self.runtimes.insert(normalize_language(language), runtime);
        self
    }

    /// Build the engine from the configured language registry
    pub fn from_config(config: &SandboxConfig) -> Result<Self> {
        let mut engine = ExecutionEngine::new(config.default_timeout, config.max_timeout);

        let needs_wasm = config
            .runtimes
            .iter()
            .any(|spec| matches!(spec, RuntimeSpec::Wasm { .. }));
        let wasm_host = if needs_wasm {
            Some(Arc::new(WasmHost::new(&config.wasm, config.max_output_bytes)?))
        } else {
            None
        };

        let needs_docker = config
            .runtimes
            .iter()
            .any(|spec| matches!(spec, RuntimeSpec::Container { .. }));
        let docker = if needs_docker {
            match bollard::Docker::connect_with_local_defaults() {
                Ok(docker) => Some(docker),
                Err(e) => {
                    warn!("Docker client unavailable, container languages will use placeholders: {}", e);
                    None
                }
            }
        } else {
            None
        };

        for spec in &config.runtimes {
            let runtime: Arc<dyn SandboxRuntime> = match spec {
                RuntimeSpec::Wasm {
                    language,
                    artifact,
                    args,
                } => {
                    let Some(host) = wasm_host.clone() else {
                        return Err(Error::Internal("wasm host not initialised".to_string()));
                    };
                    let path = config.wasm.artifact_dir.join(artifact);
                    Arc::new(WasmRuntime::new(host, language, path, args.clone()))
                }
                RuntimeSpec::Container {
                    language,
                    image,
                    command,
                } => Arc::new(ContainerRuntime::new(
                    docker.clone(),
                    &config.container,
                    language,
                    image,
                    command.clone(),
                    config.max_output_bytes,
                )),
            };
            engine = engine.with_runtime(spec.language(), runtime);
        }

        info!("Execution engine ready: {}", engine.languages().join(", "));
        Ok(engine)
    }

    /// Registered languages, sorted
    pub fn languages(&self) -> Vec<&str> {
        let mut languages: Vec<&str> = self.runtimes.keys().map(String::as_str).collect();
        languages.sort_unstable();
        languages
    }

    /// Clamp a requested timeout to the configured maximum
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout)
    }

    /// Run `source` in the sandbox registered for `language`.
    ///
    /// Unknown languages fail before any sandbox work. Reaching `deadline`
    /// drops the runtime's future, which stops its sandbox, and yields
    /// [`Error::Timeout`].
    pub async fn execute(&self, source: &str, language: &str, deadline: Instant) -> Result<RunOutput> {
        let runtime = self
            .runtimes
            .get(&normalize_language(language))
            .cloned()
            .ok_or_else(|| Error::UnsupportedLanguage(language.to_string()))?;

        let started = Instant::now();
        debug!("Executing {} bytes on {} runtime", source.len(), runtime.name());

        match tokio::time::timeout_at(deadline, runtime.run(source, deadline)).await {
            Ok(result) => result,
            Err(_) => {
                let budget = deadline.saturating_duration_since(started);
                warn!("Execution on {} runtime timed out after {:?}", runtime.name(), budget);
                Err(Error::Timeout(budget))
            }
        }
    }

    /// Execute a client request and shape the response
    pub async fn run_request(&self, request: ExecutionRequest) -> ExecutionResult {
        let timeout = self.effective_timeout(request.timeout_ms.map(Duration::from_millis));
        let started = Instant::now();
        let outcome = self
            .execute(&request.source_text, &request.language_id, started + timeout)
            .await;
        ExecutionResult::from_outcome(outcome, started.elapsed())
    }
}
