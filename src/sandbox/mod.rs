//! Sandbox module - Isolated execution of untrusted source text
//!
//! Two runtime kinds back the language registry:
//! - Wasm: WASI command modules (language interpreters) run under Wasmtime
//! - Container: ephemeral Docker containers with networking disabled
//!
//! The [`ExecutionEngine`] maps language identifiers to runtimes and enforces
//! the wall-clock deadline on every run.

mod container;
mod engine;
mod runtime;
mod wasm;

pub use container::ContainerRuntime;
pub use engine::{normalize_language, ExecutionEngine, ExecutionRequest, ExecutionResult};
pub use runtime::{combine_streams, RunOutput, SandboxRuntime};
pub use wasm::{WasmHost, WasmRuntime};

use crate::config::SandboxConfig;
use crate::error::Result;

/// Create an execution engine based on the configuration
pub fn create_engine(config: &SandboxConfig) -> Result<ExecutionEngine> {
    ExecutionEngine::from_config(config)
}
