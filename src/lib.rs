//! # Coderoom
//!
//! Realtime layer of a collaborative code editor.
//!
//! ## Features
//!
//! - **Session Hub:** one coordinator task serializes membership and fan-out per session
//! - **Presence:** `peer-joined` / `peer-left` events synthesized by the hub
//! - **Backpressure:** bounded per-peer queues; slow consumers are evicted, never waited on
//! - **Sandboxed Execution:** WASI modules under Wasmtime or ephemeral Docker containers,
//!   bounded by a hard wall-clock deadline

pub mod config;
pub mod core;
pub mod error;
pub mod realtime;
pub mod sandbox;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
