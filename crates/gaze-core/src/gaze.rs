//! Gaze estimation from face-mesh landmarks.
//!
//! A "gaze estimate" here is an approximate eye-centre position in image
//! pixels, not a gaze-direction vector.  For each eye the estimator averages
//! two eyelid landmarks (one on the lower lid, one on the upper lid) whose
//! midpoint sits close to the centre of the eye socket, then scales the
//! normalised result by the frame size.
//!
//! ```text
//!        159 (upper lid)              386 (upper lid)
//!   left  ·                     right  ·
//!        145 (lower lid)              374 (lower lid)
//! ```
//!
//! The function is pure: identical inputs always yield bit-identical output.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::landmarks::LandmarkSet;

/// Face-mesh indices bracketing the left eye (lower lid, upper lid).
pub const LEFT_EYE_LANDMARKS: [usize; 2] = [145, 159];

/// Face-mesh indices bracketing the right eye (lower lid, upper lid).
pub const RIGHT_EYE_LANDMARKS: [usize; 2] = [374, 386];

/// Pixel-space eye-centre coordinates for one frame.
///
/// Values are not clamped: landmark jitter at the image border can place a
/// coordinate slightly outside `[0, w) × [0, h)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazeEstimate {
    pub gaze_left_x: f64,
    pub gaze_left_y: f64,
    pub gaze_right_x: f64,
    pub gaze_right_y: f64,
}

/// Result of running the estimator on one frame.
///
/// `NotFound` is a normal outcome (no face in view), not an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GazeOutcome {
    Found(GazeEstimate),
    NotFound,
}

/// The landmark set was too small to contain the eyelid indices.
///
/// This only happens if the detector was configured without the expected
/// topology; it is surfaced as an unexpected failure.
#[derive(Debug, Error, PartialEq)]
pub enum EstimateError {
    #[error("landmark {index} missing: face has only {available} points")]
    MissingLandmark { index: usize, available: usize },
}

/// Estimates left and right eye-centre positions.
///
/// Only the first face in `faces` is used; any further faces are ignored.
///
/// # Errors
///
/// Returns [`EstimateError::MissingLandmark`] if the first face lacks one of
/// the eyelid indices.
///
/// # Example
///
/// ```rust
/// use gaze_core::gaze::{estimate_gaze, GazeOutcome};
///
/// let outcome = estimate_gaze(&[], 640, 480).unwrap();
/// assert_eq!(outcome, GazeOutcome::NotFound);
/// ```
pub fn estimate_gaze(
    faces: &[LandmarkSet],
    width: u32,
    height: u32,
) -> Result<GazeOutcome, EstimateError> {
    let Some(face) = faces.first() else {
        return Ok(GazeOutcome::NotFound);
    };

    let (left_x, left_y) = eye_centre(face, LEFT_EYE_LANDMARKS)?;
    let (right_x, right_y) = eye_centre(face, RIGHT_EYE_LANDMARKS)?;

    let w = f64::from(width);
    let h = f64::from(height);

    Ok(GazeOutcome::Found(GazeEstimate {
        gaze_left_x: left_x * w,
        gaze_left_y: left_y * h,
        gaze_right_x: right_x * w,
        gaze_right_y: right_y * h,
    }))
}

/// Arithmetic mean of the normalised positions at `indices`.
fn eye_centre(face: &LandmarkSet, indices: [usize; 2]) -> Result<(f64, f64), EstimateError> {
    let mut sum_x = 0.0_f64;
    let mut sum_y = 0.0_f64;
    for index in indices {
        let point = face.get(index).ok_or(EstimateError::MissingLandmark {
            index,
            available: face.len(),
        })?;
        sum_x += f64::from(point.x);
        sum_y += f64::from(point.y);
    }
    let n = indices.len() as f64;
    Ok((sum_x / n, sum_y / n))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
