//! Server configuration types.
//!
//! [`ServerConfig`] is the single source of truth for all runtime settings.
//! `main.rs` builds it from CLI arguments, environment variables and an
//! optional TOML file; tests build it directly or from
//! [`ServerConfig::default`].
//!
//! Keeping configuration as a plain struct (no globals, no environment reads
//! inside the domain) lets the server be embedded in tests with an ephemeral
//! port and a stub detector.

use std::net::SocketAddr;
use std::path::PathBuf;

use gaze_core::DetectorOptions;

use crate::domain::cors::CorsPolicy;

/// Default listening port, matching the port camera clients already target.
pub const DEFAULT_PORT: u16 = 3000;

/// Default number of messages (and replies) waiting per connection.
pub const DEFAULT_FRAME_QUEUE_DEPTH: usize = 8;

/// Default upper bound for one inbound WebSocket message.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// All runtime configuration for the gaze server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address and port the WebSocket listener binds to.
    pub bind_addr: SocketAddr,

    /// Capacity of the per-connection backlog and reply queue.
    ///
    /// When a client sends faster than frames can be processed, at most this
    /// many messages wait; older ones are discarded and answered with a
    /// "Frame dropped" error.  The socket keeps being read so a Close frame
    /// is seen immediately.
    pub frame_queue_depth: usize,

    /// Largest WebSocket message accepted, in bytes.
    ///
    /// Larger messages are refused by the transport: the connection is
    /// closed without an `error` event.
    pub max_frame_bytes: usize,

    /// Cross-origin policy for the upgrade handshake.
    pub cors: CorsPolicy,

    /// Landmark model settings.
    pub detector: DetectorConfig,
}

/// Settings for the face detector and face-mesh landmark models.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectorConfig {
    /// Path to the face-landmark ONNX model.  Required to start the binary.
    pub model_path: Option<PathBuf>,

    /// Path to the BlazeFace face-detection ONNX model that locates the face
    /// before the mesh runs.  Required to start the binary.
    pub face_model_path: Option<PathBuf>,

    /// Options fixed at load time.
    pub options: DetectorOptions,
}

impl Default for ServerConfig {
    /// | Field             | Default          |
    /// |-------------------|------------------|
    /// | bind_addr         | `0.0.0.0:3000`   |
    /// | frame_queue_depth | 8                |
    /// | max_frame_bytes   | 8 MiB            |
    /// | cors              | fully open       |
    /// | detector          | refined, p ≥ 0.5 |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            frame_queue_depth: DEFAULT_FRAME_QUEUE_DEPTH,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            cors: CorsPolicy::default(),
            detector: DetectorConfig::default(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
