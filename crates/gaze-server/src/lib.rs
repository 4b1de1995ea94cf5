//! gaze-server library crate.
//!
//! This crate exposes the gaze pipeline from `gaze-core` as a streaming
//! network service: clients open a WebSocket, send encoded camera frames, and
//! receive one `gaze_data` or `error` event back per frame, in order.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Camera client (binary frames / JSON events over WebSocket)
//!         ↕
//! [gaze-server]
//!   ├── domain/           Pure types: wire events, ServerConfig, CorsPolicy
//!   ├── application/      Session state machine, failure → event mapping,
//!   │                     bounded drop-oldest backlog
//!   └── infrastructure/
//!         ├── ws_server/       WebSocket accept loop + per-session tasks
//!         ├── face_detection/  BlazeFace face locator (feature `onnx`)
//!         ├── face_mesh/       Crop + face-mesh landmark detector (feature `onnx`)
//!         └── config_file/     TOML configuration loading
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O, no async, no frameworks.
//! - `application` depends on `domain` and `gaze-core` only.
//! - `infrastructure` depends on all other layers plus `tokio`, `tungstenite`
//!   and `ort`.

/// Domain layer: configuration, wire protocol and CORS policy (no I/O).
pub mod domain;

/// Application layer: per-connection session state machine.
pub mod application;

/// Infrastructure layer: WebSocket server, landmark model, config file.
pub mod infrastructure;
