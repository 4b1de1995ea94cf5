//! Domain layer for gaze-server.
//!
//! Pure types with no dependencies on I/O, networking, or async runtimes:
//!
//! - Wire events exchanged with the client
//! - Server and detector configuration
//! - The cross-origin policy applied to the WebSocket handshake
//!
//! Any `tokio`, `TcpStream` or `WebSocket` type belongs in `infrastructure`.

pub mod config;
pub mod cors;
pub mod events;

pub use config::{DetectorConfig, ServerConfig};
pub use cors::CorsPolicy;
pub use events::{ClientEvent, GazePayload, ServerEvent, FRAME_DROPPED, NO_EYES_DETECTED};
