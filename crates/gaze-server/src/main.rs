//! Gaze streaming server — entry point.
//!
//! Accepts WebSocket connections from camera clients, estimates eye positions
//! for every frame they send using a face-mesh landmark model, and streams the
//! coordinates back over the same connection.
//!
//! # Usage
//!
//! ```text
//! gaze-server [OPTIONS] --model <PATH> --face-model <PATH>
//!
//! Options:
//!   --bind <ADDR>                IP address to listen on [default: 0.0.0.0]
//!   --port <PORT>                WebSocket port [default: 3000]
//!   --model <PATH>               Face-landmark ONNX model
//!   --face-model <PATH>          BlazeFace face-detection ONNX model
//!   --no-refine                  Use the 468-point mesh without iris refinement
//!   --presence-threshold <P>     Minimum face-presence probability [default: 0.5]
//!   --detection-threshold <P>    Minimum face-detector score [default: 0.5]
//!   --queue-depth <N>            Messages waiting per connection [default: 8]
//!   --max-frame-bytes <BYTES>    Largest accepted message [default: 8388608]
//!   --allowed-origin <ORIGIN>    Allowed CORS origin, repeatable [default: *]
//!   --config <PATH>              TOML configuration file
//! ```
//!
//! # Precedence
//!
//! CLI arguments and environment variables override the TOML file, which
//! overrides the built-in defaults.
//!
//! | Variable                    | Option                  |
//! |-----------------------------|-------------------------|
//! | `GAZE_BIND`                 | `--bind`                |
//! | `GAZE_PORT`                 | `--port`                |
//! | `GAZE_MODEL`                | `--model`               |
//! | `GAZE_FACE_MODEL`           | `--face-model`          |
//! | `GAZE_NO_REFINE`            | `--no-refine`           |
//! | `GAZE_PRESENCE_THRESHOLD`   | `--presence-threshold`  |
//! | `GAZE_DETECTION_THRESHOLD`  | `--detection-threshold` |
//! | `GAZE_QUEUE_DEPTH`          | `--queue-depth`         |
//! | `GAZE_MAX_FRAME_BYTES`      | `--max-frame-bytes`     |
//! | `GAZE_ALLOWED_ORIGINS`      | `--allowed-origin`      |
//! | `GAZE_CONFIG`               | `--config`              |
//!
//! `GAZE_NO_REFINE` accepts `true`/`false`.
//!
//! Log level is controlled by `RUST_LOG` (default `info`).

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use gaze_core::{DetectorOptions, FramePipeline, FrameProcessor};
use tracing::info;
use tracing_subscriber::EnvFilter;

use gaze_server::domain::config::{DEFAULT_FRAME_QUEUE_DEPTH, DEFAULT_MAX_FRAME_BYTES, DEFAULT_PORT};
use gaze_server::domain::{CorsPolicy, DetectorConfig, ServerConfig};
use gaze_server::infrastructure::config_file::{load_config, FileConfig};
use gaze_server::infrastructure::{load_detector, run_server};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Real-time gaze estimation over WebSocket.
#[derive(Debug, Parser)]
#[command(
    name = "gaze-server",
    about = "Streams per-frame eye position estimates to WebSocket camera clients",
    version
)]
struct Cli {
    /// IP address to bind the WebSocket listener to.
    #[arg(long, env = "GAZE_BIND")]
    bind: Option<String>,

    /// TCP port for the WebSocket listener.
    #[arg(long, env = "GAZE_PORT")]
    port: Option<u16>,

    /// Path to the face-landmark ONNX model.
    #[arg(long, env = "GAZE_MODEL")]
    model: Option<PathBuf>,

    /// Path to the BlazeFace face-detection ONNX model.
    #[arg(long, env = "GAZE_FACE_MODEL")]
    face_model: Option<PathBuf>,

    /// Use the base 468-point mesh instead of the iris-refined 478 points.
    #[arg(long, env = "GAZE_NO_REFINE")]
    no_refine: bool,

    /// Minimum face-presence probability for a face to be reported.
    #[arg(long, env = "GAZE_PRESENCE_THRESHOLD")]
    presence_threshold: Option<f32>,

    /// Minimum face-detector score for a face to be landmarked.
    #[arg(long, env = "GAZE_DETECTION_THRESHOLD")]
    detection_threshold: Option<f32>,

    /// Messages waiting per connection before the oldest is dropped.
    #[arg(long, env = "GAZE_QUEUE_DEPTH")]
    queue_depth: Option<usize>,

    /// Largest WebSocket message accepted, in bytes.
    #[arg(long, env = "GAZE_MAX_FRAME_BYTES")]
    max_frame_bytes: Option<usize>,

    /// Origin allowed to open a session (repeatable; `*` for any).
    #[arg(long = "allowed-origin", env = "GAZE_ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Vec<String>,

    /// TOML configuration file.
    #[arg(long, env = "GAZE_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    /// Loads the TOML file (if any) and merges it under the CLI values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the bind
    /// address is invalid.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let file = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?,
            None => FileConfig::default(),
        };
        self.merge(file)
    }

    /// Resolves every setting as CLI/env > file > default.
    fn merge(self, file: FileConfig) -> anyhow::Result<ServerConfig> {
        let bind = self
            .bind
            .or(file.server.bind)
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let ip: IpAddr = bind
            .parse()
            .with_context(|| format!("invalid bind address: '{bind}'"))?;
        let port = self.port.or(file.server.port).unwrap_or(DEFAULT_PORT);

        let origins = if self.allowed_origins.is_empty() {
            file.server.allowed_origins.unwrap_or_default()
        } else {
            self.allowed_origins
        };

        let defaults = DetectorOptions::default();
        let refine_landmarks = if self.no_refine {
            false
        } else {
            file.detector
                .refine_landmarks
                .unwrap_or(defaults.refine_landmarks)
        };

        Ok(ServerConfig {
            bind_addr: SocketAddr::new(ip, port),
            frame_queue_depth: self
                .queue_depth
                .or(file.server.frame_queue_depth)
                .unwrap_or(DEFAULT_FRAME_QUEUE_DEPTH),
            max_frame_bytes: self
                .max_frame_bytes
                .or(file.server.max_frame_bytes)
                .unwrap_or(DEFAULT_MAX_FRAME_BYTES),
            cors: CorsPolicy::with_origins(origins),
            detector: DetectorConfig {
                model_path: self.model.or(file.detector.model_path),
                face_model_path: self.face_model.or(file.detector.face_model_path),
                options: DetectorOptions {
                    refine_landmarks,
                    presence_threshold: self
                        .presence_threshold
                        .or(file.detector.presence_threshold)
                        .unwrap_or(defaults.presence_threshold),
                    detection_threshold: self
                        .detection_threshold
                        .or(file.detector.detection_threshold)
                        .unwrap_or(defaults.detection_threshold),
                },
            },
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// 1. Initialise `tracing` from `RUST_LOG` (default `info`).
/// 2. Parse CLI/env, merge the optional TOML file into a [`ServerConfig`].
/// 3. Load the landmark model once; it is shared by every session.
/// 4. Install a Ctrl+C handler that clears the `running` flag.
/// 5. Serve until the flag is cleared.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_server_config()?;

    info!(
        "gaze server starting — bind={}, refine_landmarks={}, queue_depth={}",
        config.bind_addr, config.detector.options.refine_landmarks, config.frame_queue_depth
    );

    let detector = load_detector(&config.detector)?;
    let processor: Arc<dyn FrameProcessor> = Arc::new(FramePipeline::new(detector));

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C — initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, processor, running).await?;

    info!("gaze server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
