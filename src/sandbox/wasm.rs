//! WebAssembly sandbox using Wasmtime
//!
//! Language interpreters are shipped as WASI command modules. Each run gets a
//! fresh store with the program on stdin, bounded in-memory stdout/stderr, no
//! preopened directories, no environment and no sockets.
//!
//! A background thread advances the engine epoch every `epoch_tick`. Guests
//! yield to the async executor on every tick, so dropping the run future stops
//! the guest at its next tick; the store also traps on its own once the
//! deadline passes.

use async_trait::async_trait;
use moka::future::Cache;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use wasmtime::{
    Config, Engine, Linker, Module, Store, StoreLimits, StoreLimitsBuilder, Trap, UpdateDeadline,
};
use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};
use wasmtime_wasi::{I32Exit, WasiCtxBuilder};

use crate::config::WasmConfig;
use crate::error::{Error, Result};
use crate::sandbox::runtime::{RunOutput, SandboxRuntime};

/// Advances the engine epoch until dropped
struct EpochTicker {
    stop: Arc<AtomicBool>,
}

impl EpochTicker {
    fn start(engine: Engine, tick: Duration) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        std::thread::Builder::new()
            .name("wasm-epoch".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(tick);
                    engine.increment_epoch();
                }
            })?;
        Ok(EpochTicker { stop })
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Per-store host state
struct SandboxState {
    wasi: WasiP1Ctx,
    limits: StoreLimits,
}

/// Shared Wasmtime engine, compiled-module cache and epoch ticker
pub struct WasmHost {
    engine: Engine,
    modules: Cache<PathBuf, Module>,
    max_memory_bytes: usize,
    max_output_bytes: usize,
    _ticker: EpochTicker,
}

impl WasmHost {
    /// Create the shared Wasm host
    pub fn new(config: &WasmConfig, max_output_bytes: usize) -> Result<Self> {
        let mut wasm_config = Config::new();
        wasm_config.async_support(true);
        wasm_config.epoch_interruption(true);

        let engine = Engine::new(&wasm_config)?;
        let ticker = EpochTicker::start(engine.clone(), config.epoch_tick)?;

        info!("Wasm host initialized (epoch tick {:?})", config.epoch_tick);
        Ok(WasmHost {
            engine,
            modules: Cache::new(config.module_cache_capacity),
            max_memory_bytes: config.max_memory_bytes,
            max_output_bytes,
            _ticker: ticker,
        })
    }

    /// Compile `path`, or return the cached module
    ///
    /// Compilation runs in its own task that fills the cache, so a caller
    /// dropped at its deadline still leaves the module compiled for the next
    /// run. Concurrent callers for the same path share one compile.
    async fn module(&self, path: &Path) -> Result<Module> {
        let engine = self.engine.clone();
        let modules = self.modules.clone();
        let key = path.to_path_buf();
        let compile = tokio::spawn(async move {
            let source = key.clone();
            modules
                .try_get_with(key, async move {
                    debug!("Compiling wasm module {}", source.display());
                    tokio::task::spawn_blocking(move || Module::from_file(&engine, &source))
                        .await
                        .map_err(|e| Error::Internal(format!("module compile task failed: {}", e)))?
                        .map_err(Error::from)
                })
                .await
                .map_err(|e| Error::Wasm(e.to_string()))
        });

        compile
            .await
            .map_err(|e| Error::Internal(format!("module compile task failed: {}", e)))?
    }
}

/// A language served by a WASI command module
pub struct WasmRuntime {
    host: Arc<WasmHost>,
    language: String,
    artifact: PathBuf,
    args: Vec<String>,
}

impl WasmRuntime {
    /// Create a runtime for `language` backed by the module at `artifact`
    pub fn new(host: Arc<WasmHost>, language: &str, artifact: PathBuf, args: Vec<String>) -> Self {
        let args = if args.is_empty() {
            vec![language.to_string()]
        } else {
            args
        };
        WasmRuntime {
            host,
            language: language.to_string(),
            artifact,
            args,
        }
    }
}

#[async_trait]
impl SandboxRuntime for WasmRuntime {
    fn name(&self) -> &str {
        "wasm"
    }

    async fn run(&self, source: &str, deadline: Instant) -> Result<RunOutput> {
        if !tokio::fs::try_exists(&self.artifact).await.unwrap_or(false) {
            warn!(
                "Wasm module for {} not found at {}, returning placeholder",
                self.language,
                self.artifact.display()
            );
            return Ok(RunOutput::placeholder(
                &self.language,
                source,
                self.artifact.display().to_string(),
            ));
        }

        let started = Instant::now();
        let module = self.host.module(&self.artifact).await?;

        let stdout = MemoryOutputPipe::new(self.host.max_output_bytes);
        let stderr = MemoryOutputPipe::new(self.host.max_output_bytes);
        let wasi = WasiCtxBuilder::new()
            .stdin(MemoryInputPipe::new(source.to_string()))
            .stdout(stdout.clone())
            .stderr(stderr.clone())
            .args(self.args.as_slice())
            .build_p1();
        let limits = StoreLimitsBuilder::new()
            .memory_size(self.host.max_memory_bytes)
            .instances(1)
            .build();

        let mut store = Store::new(&self.host.engine, SandboxState { wasi, limits });
        store.limiter(|state| &mut state.limits);
        store.set_epoch_deadline(1);
        let hard_deadline = deadline.into_std();
        store.epoch_deadline_callback(move |_| {
            if std::time::Instant::now() >= hard_deadline {
                return Err(Trap::Interrupt.into());
            }
            Ok(UpdateDeadline::Yield(1))
        });

        let mut linker: Linker<SandboxState> = Linker::new(&self.host.engine);
        preview1::add_to_linker_async(&mut linker, |state| &mut state.wasi)?;

        let instance = linker.instantiate_async(&mut store, &module).await?;
        let start = instance.get_typed_func::<(), ()>(&mut store, "_start")?;
        let result = start.call_async(&mut store, ()).await;

        let stdout = String::from_utf8_lossy(&stdout.contents()).into_owned();
        let stderr = String::from_utf8_lossy(&stderr.contents()).into_owned();

        match result {
            Ok(()) => Ok(RunOutput::completed(stdout, stderr)),
            Err(err) => {
                if let Some(exit) = err.downcast_ref::<I32Exit>() {
                    if exit.0 == 0 {
                        return Ok(RunOutput::completed(stdout, stderr));
                    }
                    return Err(Error::Runtime {
                        message: format!("exit status {}", exit.0),
                        stderr,
                    });
                }
                if matches!(err.downcast_ref::<Trap>(), Some(Trap::Interrupt)) {
                    return Err(Error::Timeout(started.elapsed()));
                }
                Err(Error::Runtime {
                    message: format!("trap: {}", err),
                    stderr,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ECHO_WAT: &str = r#"
(module
  (import "wasi_snapshot_preview1" "fd_read" (func $fd_read (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (func (export "_start")
    (i32.store (i32.const 0) (i32.const 64))
    (i32.store (i32.const 4) (i32.const 1024))
    (drop (call $fd_read (i32.const 0) (i32.const 0) (i32.const 1) (i32.const 8)))
    (i32.store (i32.const 4) (i32.load (i32.const 8)))
    (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))))
"#;

    const FAIL_WAT: &str = r#"
(module
  (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
  (memory (export "memory") 1)
  (data (i32.const 16) "boom")
  (func (export "_start")
    (i32.store (i32.const 0) (i32.const 16))
    (i32.store (i32.const 4) (i32.const 4))
    (drop (call $fd_write (i32.const 2) (i32.const 0) (i32.const 1) (i32.const 8)))
    (call $proc_exit (i32.const 3))))
"#;

    const SPIN_WAT: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "_start")
    (loop $spin (br $spin))))
"#;

    fn host() -> Arc<WasmHost> {
        let config = WasmConfig {
            epoch_tick: Duration::from_millis(5),
            ..WasmConfig::default()
        };
        Arc::new(WasmHost::new(&config, 64 * 1024).unwrap())
    }

    fn module_file(dir: &Path, name: &str, wat: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, wat).unwrap();
        path
    }

    #[tokio::test]
    async fn test_program_reads_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let path = module_file(dir.path(), "echo.wat", ECHO_WAT);
        let runtime = WasmRuntime::new(host(), "echo", path, Vec::new());

        let deadline = Instant::now() + Duration::from_secs(5);
        let output = runtime.run("hello sandbox", deadline).await.unwrap();

        assert_eq!(output.stdout, "hello sandbox");
        assert!(output.stderr.is_empty());
        assert!(!output.is_placeholder());
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let path = module_file(dir.path(), "fail.wat", FAIL_WAT);
        let runtime = WasmRuntime::new(host(), "fail", path, Vec::new());

        let deadline = Instant::now() + Duration::from_secs(5);
        let err = runtime.run("", deadline).await.unwrap_err();

        match err {
            Error::Runtime { message, stderr } => {
                assert_eq!(message, "exit status 3");
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_spinning_guest_is_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let path = module_file(dir.path(), "spin.wat", SPIN_WAT);
        let runtime = WasmRuntime::new(host(), "spin", path, Vec::new());

        let started = Instant::now();
        let err = runtime
            .run("", started + Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_module_is_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = WasmRuntime::new(host(), "python", dir.path().join("python.wasm"), Vec::new());

        let deadline = Instant::now() + Duration::from_secs(1);
        let output = runtime.run("print('hi')", deadline).await.unwrap();

        assert!(output.is_placeholder());
        assert!(output.stdout.contains("print('hi')"));
        assert!(output.stdout.contains("python.wasm"));
    }

    #[tokio::test]
    async fn test_modules_are_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = module_file(dir.path(), "echo.wat", ECHO_WAT);
        let host = host();
        let runtime = WasmRuntime::new(host.clone(), "echo", path.clone(), Vec::new());

        for input in ["one", "two"] {
            let deadline = Instant::now() + Duration::from_secs(5);
            let output = runtime.run(input, deadline).await.unwrap();
            assert_eq!(output.stdout, input);
        }

        host.modules.run_pending_tasks().await;
        assert_eq!(host.modules.entry_count(), 1);
        assert!(host.modules.contains_key(&path));
    }

    #[tokio::test]
    async fn test_compile_outlives_cancelled_caller() {
        let dir = tempfile::tempdir().unwrap();
        let path = module_file(dir.path(), "echo.wat", ECHO_WAT);
        let host = host();

        // The caller gives up before the compile task has been scheduled
        let cancelled = tokio::time::timeout(Duration::ZERO, host.module(&path)).await;
        assert!(cancelled.is_err());

        let waited = Instant::now();
        while !host.modules.contains_key(&path) {
            assert!(waited.elapsed() < Duration::from_secs(10), "module never cached");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let runtime = WasmRuntime::new(host.clone(), "echo", path, Vec::new());
        let output = runtime
            .run("cached", Instant::now() + Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(output.stdout, "cached");
        host.modules.run_pending_tasks().await;
        assert_eq!(host.modules.entry_count(), 1);
    }
}
