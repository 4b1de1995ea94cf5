//! Application layer for gaze-server.
//!
//! Knows *what* happens to a connection (the session state machine, how
//! frame results become events, and how much work may wait) but not *how*
//! bytes reach it.
//!
//! # What does NOT belong here?
//!
//! - Sockets, listeners, or the WebSocket handshake (infrastructure)
//! - Tokio task spawning or blocking offload (infrastructure)
//! - Model loading (infrastructure)

pub mod backlog;
pub mod session;

pub use backlog::FrameBacklog;
pub use session::{
    outcome_to_event, run_guarded, Dispatch, FrameFailure, Session, SessionError, SessionEvent,
    SessionId, SessionState, SessionStats,
};
