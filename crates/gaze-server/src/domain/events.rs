//! Event types for the client-facing WebSocket protocol.
//!
//! The protocol is event based: every message names an event and carries an
//! optional payload.  Inbound, a client sends encoded camera frames; outbound,
//! the server answers every frame with exactly one event.
//!
//! # Message flow
//!
//! ```text
//! Client → Server:  binary frame                       →  handle_frame (raw image bytes)
//!                   {"event":"handle_frame","data":[..]} →  handle_frame (byte array)
//!                   {"event":"disconnect"}              →  disconnect
//! Server → Client:  {"event":"gaze_data","data":{...}}
//!                   {"event":"error","data":{"message":"..."}}
//! ```
//!
//! # Why is "no face" a `gaze_data` event?
//!
//! A frame without a detectable face is a valid result, not a protocol fault.
//! It is reported as `gaze_data` carrying `{"error": "Failed to detect eyes"}`
//! so clients can keep a single result handler; the `error` event is reserved
//! for frames that could not be processed at all.
//!
//! # Busy server
//!
//! When a client sends frames faster than they can be processed, the oldest
//! waiting frames are discarded.  Each discarded frame is still answered, in
//! its place in the sequence, with
//! `{"event":"error","data":{"message":"Frame dropped: server busy"}}`.
//!
//! # Oversized messages
//!
//! A message larger than `max_frame_bytes` is rejected by the WebSocket
//! transport before it becomes an event.  No `error` event is sent for it:
//! the server closes the connection, and replies to frames that were sent
//! before the oversized message may still be delivered first.

use gaze_core::GazeEstimate;
use serde::{Deserialize, Serialize};

/// Payload text of a `gaze_data` event when no face was found.
pub const NO_EYES_DETECTED: &str = "Failed to detect eyes";

/// Message of the `error` event answering a frame discarded under load.
pub const FRAME_DROPPED: &str = "Frame dropped: server busy";

// ── Client → Server events ────────────────────────────────────────────────────

/// Events a client can send as JSON text frames.
///
/// Binary WebSocket frames are always treated as `handle_frame` with the raw
/// bytes as payload, which is the cheaper path for browsers.
///
/// # Serde representation
///
/// ```json
/// {"event":"handle_frame","data":[255,216,255,224]}
/// {"event":"disconnect"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// One encoded still image (JPEG, PNG, ...).
    HandleFrame(Vec<u8>),

    /// Client asks the server to end the session.
    Disconnect,
}

// ── Server → Client events ────────────────────────────────────────────────────

/// Body of a `gaze_data` event.
///
/// Untagged: the success variant serialises to the four coordinate keys, the
/// absence variant to a single `error` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GazePayload {
    Gaze(GazeEstimate),
    NotDetected { error: String },
}

impl GazePayload {
    pub fn not_detected() -> Self {
        GazePayload::NotDetected {
            error: NO_EYES_DETECTED.to_string(),
        }
    }
}

/// Events the server sends back to the originating client.
///
/// # Serde representation
///
/// ```json
/// {"event":"gaze_data","data":{"gaze_left_x":224.0,"gaze_left_y":192.0,"gaze_right_x":416.0,"gaze_right_y":192.0}}
/// {"event":"gaze_data","data":{"error":"Failed to detect eyes"}}
/// {"event":"error","data":{"message":"Failed to decode frame: empty frame buffer"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Result for one successfully decoded frame.
    GazeData(GazePayload),

    /// The frame (or message) could not be processed.
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// Wire name of the event, for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::GazeData(_) => "gaze_data",
            ServerEvent::Error { .. } => "error",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
