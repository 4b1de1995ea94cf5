//! # gaze-core
//!
//! Shared library for the gaze streaming service containing the per-frame
//! processing pipeline: image decoding, the face-landmark capability
//! abstraction, and the gaze estimator.
//!
//! This crate has no dependencies on network sockets or async runtimes.  The
//! server crate drives it from its WebSocket sessions, and tests drive it
//! directly.
//!
//! # Architecture overview
//!
//! ```text
//! encoded bytes ──► frame::decode_frame ──► DecodedFrame::to_rgb
//!                                                  │
//!                                                  ▼
//!                     landmarks::LandmarkDetector::detect (black box)
//!                                                  │
//!                                                  ▼
//!                      gaze::estimate_gaze ──► GazeOutcome
//! ```
//!
//! - **`frame`** – Turns an opaque byte buffer into a pixel grid.
//! - **`landmarks`** – Landmark point/set types and the detector trait that
//!   wraps an external face-mesh model.
//! - **`gaze`** – Pure function from landmarks and frame size to eye-centre
//!   pixel coordinates.
//! - **`pipeline`** – Composes the three stages behind [`FrameProcessor`].

pub mod frame;
pub mod gaze;
pub mod landmarks;
pub mod pipeline;

// Re-export the most-used types at the crate root so callers can write
// `gaze_core::GazeEstimate` instead of `gaze_core::gaze::GazeEstimate`.
pub use frame::{decode_frame, DecodeError, DecodedFrame};
pub use gaze::{estimate_gaze, EstimateError, GazeEstimate, GazeOutcome};
pub use landmarks::{
    DetectionError, DetectorOptions, LandmarkDetector, LandmarkPoint, LandmarkSet,
};
pub use pipeline::{FramePipeline, FrameProcessor, PipelineError};
