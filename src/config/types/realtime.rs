//! Realtime configuration types
//!
//! Liveness timers and queue bounds for the session hub and its connections.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Realtime (websocket) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Connection is torn down when no frame arrives within this window
    #[serde(with = "humantime_serde", default = "default_read_timeout")]
    pub read_timeout: Duration,
    /// Liveness probe period, must be shorter than `read_timeout`
    #[serde(with = "humantime_serde", default = "default_ping_interval")]
    pub ping_interval: Duration,
    /// Time allowed for a single outbound write
    #[serde(with = "humantime_serde", default = "default_write_timeout")]
    pub write_timeout: Duration,
    /// Largest inbound message accepted from a client
    #[serde(default = "default_max_frame")]
    pub max_frame_bytes: usize,
    /// Pending payloads per connection before it is evicted
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Pending hub commands before callers wait
    #[serde(default = "default_hub_capacity")]
    pub hub_command_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        RealtimeConfig {
            read_timeout: default_read_timeout(),
            ping_interval: default_ping_interval(),
            write_timeout: default_write_timeout(),
            max_frame_bytes: default_max_frame(),
            queue_capacity: default_queue_capacity(),
            hub_command_capacity: default_hub_capacity(),
        }
    }
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_ping_interval() -> Duration {
    default_read_timeout() * 9 / 10
}

fn default_write_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_frame() -> usize {
    64 * 1024
}

fn default_queue_capacity() -> usize {
    256
}

fn default_hub_capacity() -> usize {
    1024
}
