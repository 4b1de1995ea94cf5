//! Facial landmark types and the detector capability.
//!
//! The landmark model itself is an external black box: it takes an RGB image
//! and returns zero or more ordered sets of normalised face-mesh points.  This
//! module defines the types that cross that boundary and the
//! [`LandmarkDetector`] trait the rest of the service programs against.
//!
//! # Index scheme
//!
//! Points follow the MediaPipe face-mesh topology: 468 points cover the face
//! surface, and when refinement is enabled 10 more (indices 468..478) describe
//! the irises.  The gaze estimator relies on eyelid indices from this scheme,
//! so a detector built on a different topology must re-derive them.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of points in the base face mesh.
pub const FACE_MESH_LANDMARKS: usize = 468;

/// Number of points when iris refinement is enabled.
pub const REFINED_FACE_MESH_LANDMARKS: usize = 478;

/// A single face-mesh point.
///
/// `x` and `y` are normalised to `[0, 1]` relative to the image width and
/// height.  `z` is the model's relative depth and is not used for gaze.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl LandmarkPoint {
    /// Creates a point with zero depth.
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }
}

/// All landmark points for one detected face, ordered by mesh index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet(Vec<LandmarkPoint>);

impl LandmarkSet {
    pub fn new(points: Vec<LandmarkPoint>) -> Self {
        Self(points)
    }

    /// Returns the point at mesh `index`, if the set is that large.
    pub fn get(&self, index: usize) -> Option<&LandmarkPoint> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn points(&self) -> &[LandmarkPoint] {
        &self.0
    }
}

impl From<Vec<LandmarkPoint>> for LandmarkSet {
    fn from(points: Vec<LandmarkPoint>) -> Self {
        Self(points)
    }
}

/// Fixed options a detector is configured with at process start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    /// Emit the refined (iris-including) 478-point layout when the model
    /// provides iris points.  The 468 base points are always emitted.
    pub refine_landmarks: bool,
    /// Minimum face-presence probability for a face to be reported.
    pub presence_threshold: f32,
    /// Minimum face-detector score for a region to be handed to the mesh.
    pub detection_threshold: f32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            refine_landmarks: true,
            presence_threshold: 0.5,
            detection_threshold: 0.5,
        }
    }
}

/// Failures raised by the landmark capability.
#[derive(Debug, Error)]
pub enum DetectionError {
    /// The inference backend rejected the input or failed internally.
    #[error("inference backend failure: {0}")]
    Backend(String),

    /// The model produced output of an unexpected shape.
    #[error("unexpected model output: expected at least {expected} values, got {actual}")]
    UnexpectedOutput { expected: usize, actual: usize },
}

/// The face-landmark capability.
///
/// Implementations are stateless per call and shared across every session as
/// an `Arc<dyn LandmarkDetector>`, so they must be `Send + Sync`.  A backend
/// that is not safe for concurrent use guards itself internally (for example
/// with a `Mutex` around the inference session) rather than forcing callers to
/// serialise the whole pipeline.
///
/// An image with no face yields `Ok(vec![])`, never an error.
pub trait LandmarkDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<LandmarkSet>, DetectionError>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
