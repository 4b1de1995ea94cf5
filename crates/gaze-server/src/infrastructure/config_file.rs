//! TOML configuration file for the gaze server.
//!
//! Every key is optional; a missing key falls back to the CLI/env value or the
//! built-in default.  Example:
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0"
//! port = 3000
//! frame_queue_depth = 8
//! max_frame_bytes = 8388608
//! allowed_origins = ["*"]
//!
//! [detector]
//! model_path = "models/face_landmark_with_attention.onnx"
//! face_model_path = "models/face_detection_short_range.onnx"
//! refine_landmarks = true
//! presence_threshold = 0.5
//! detection_threshold = 0.5
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level layout of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub detector: DetectorSection,
}

/// `[server]` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub frame_queue_depth: Option<usize>,
    pub max_frame_bytes: Option<usize>,
    pub allowed_origins: Option<Vec<String>>,
}

/// `[detector]` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorSection {
    pub model_path: Option<PathBuf>,
    pub face_model_path: Option<PathBuf>,
    pub refine_landmarks: Option<bool>,
    pub presence_threshold: Option<f32>,
    pub detection_threshold: Option<f32>,
}

/// Parses configuration from TOML text.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys.
pub fn parse_config(text: &str) -> Result<FileConfig, ConfigError> {
    Ok(toml::from_str(text)?)
}

/// Reads and parses the configuration file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read, or
/// [`ConfigError::Parse`] if it is not valid.
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&text)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
