//! Infrastructure layer for gaze-server.
//!
//! Handles all I/O and external capabilities:
//!
//! - Binding the listener and accepting WebSocket connections
//! - Spawning per-session Tokio tasks and offloading frames to blocking threads
//! - Loading the ONNX face-detection and face-mesh models
//! - Reading the TOML configuration file
//!
//! Protocol types and the session state machine live in `domain` and
//! `application`.

pub mod config_file;
#[cfg(feature = "onnx")]
pub mod face_detection;
#[cfg(feature = "onnx")]
pub mod face_mesh;
#[cfg(feature = "onnx")]
mod onnx;
pub mod ws_server;

use std::sync::Arc;

use gaze_core::LandmarkDetector;

use crate::domain::config::DetectorConfig;

pub use ws_server::{run_server, GazeServer};

/// Builds the landmark detector described by `config`.
///
/// # Errors
///
/// Fails if either model path is missing or a model cannot be loaded.
#[cfg(feature = "onnx")]
pub fn load_detector(config: &DetectorConfig) -> anyhow::Result<Arc<dyn LandmarkDetector>> {
    use anyhow::Context;

    let mesh_path = config
        .model_path
        .as_deref()
        .context("no landmark model configured; pass --model or set GAZE_MODEL")?;
    let face_path = config
        .face_model_path
        .as_deref()
        .context("no face-detection model configured; pass --face-model or set GAZE_FACE_MODEL")?;
    let mesh = face_mesh::OnnxFaceMesh::load(mesh_path, face_path, config.options)
        .with_context(|| {
            format!(
                "failed to load models {} and {}",
                mesh_path.display(),
                face_path.display()
            )
        })?;
    Ok(Arc::new(mesh))
}

/// Without the `onnx` feature there is no landmark backend to load.
#[cfg(not(feature = "onnx"))]
pub fn load_detector(_config: &DetectorConfig) -> anyhow::Result<Arc<dyn LandmarkDetector>> {
    anyhow::bail!("gaze-server was built without the `onnx` feature; no landmark detector is available")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(all(test, feature = "onnx"))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_face_model_is_required() {
        let config = DetectorConfig {
            model_path: Some(PathBuf::from("/nonexistent/face_landmark.onnx")),
            ..DetectorConfig::default()
        };

        let err = load_detector(&config).err().map(|e| e.to_string());

        assert_eq!(
            err.as_deref(),
            Some("no face-detection model configured; pass --face-model or set GAZE_FACE_MODEL")
        );
    }

    #[test]
    fn test_landmark_model_is_required() {
        let err = load_detector(&DetectorConfig::default())
            .err()
            .map(|e| e.to_string());

        assert_eq!(
            err.as_deref(),
            Some("no landmark model configured; pass --model or set GAZE_MODEL")
        );
    }
}
