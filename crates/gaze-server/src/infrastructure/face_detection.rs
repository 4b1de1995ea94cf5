//! BlazeFace short-range face detector backed by ONNX Runtime.
//!
//! The face-mesh model expects a tight crop around one face.  This detector
//! finds the face in the full frame and [`FaceBox::roi`] turns it into the
//! crop the mesh runs on.
//!
//! # Model contract
//!
//! - Input: `[1, 3, 128, 128]` float32, RGB, values in `[0, 1]` (NCHW).
//! - `regressors`: `[1, 896, 16]`, box centre and size offsets (plus six
//!   keypoints, unused) in input-pixel units relative to each anchor.
//! - `classificators`: `[1, 896, 1]`, one score logit per anchor.
//!
//! Outputs are looked up by name and fall back to positions 0 and 1 for
//! exports that renamed them.

use std::path::Path;
use std::sync::Mutex;

use gaze_core::DetectionError;
use image::{imageops::FilterType, RgbImage};
use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

use super::onnx::{backend, load_session, lock_model, sigmoid};

/// Side length of the square detector input.
pub const DETECTOR_INPUT_SIZE: u32 = 128;

/// Number of anchors of the short-range model.
const NUM_ANCHORS: usize = 896;

/// Values per anchor in the regressor output.
const REGRESSOR_STRIDE: usize = 16;

/// How much the detected box is enlarged before cropping for the mesh.
const ROI_SCALE: f32 = 1.5;

const REGRESSORS: &str = "regressors";
const CLASSIFICATORS: &str = "classificators";

/// The strongest face in a frame.  Coordinates are normalised to the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub cx: f32,
    pub cy: f32,
    pub width: f32,
    pub height: f32,
    pub score: f32,
}

/// Pixel region of the full frame handed to the mesh model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    /// Square region around the face, enlarged by [`ROI_SCALE`] and clipped to
    /// a `frame_width × frame_height` frame.
    ///
    /// Returns `None` when nothing of the region lies inside the frame.
    pub fn roi(&self, frame_width: u32, frame_height: u32) -> Option<Roi> {
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let side = (self.width * fw).max(self.height * fh) * ROI_SCALE;
        let (cx, cy) = (self.cx * fw, self.cy * fh);

        let x0 = (cx - side / 2.0).max(0.0).floor();
        let y0 = (cy - side / 2.0).max(0.0).floor();
        let x1 = (cx + side / 2.0).min(fw).ceil();
        let y1 = (cy + side / 2.0).min(fh).ceil();
        if x1 - x0 < 1.0 || y1 - y0 < 1.0 {
            return None;
        }

        Some(Roi {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }
}

/// ONNX Runtime BlazeFace detector.
pub struct BlazeFaceDetector {
    session: Mutex<Session>,
    anchors: Vec<[f32; 2]>,
    threshold: f32,
}

impl BlazeFaceDetector {
    /// Loads the model at `model_path`.  Faces scoring below `threshold` are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DetectionError::Backend`] if the file is missing or is not a
    /// loadable ONNX model.
    pub fn load(model_path: &Path, threshold: f32) -> Result<Self, DetectionError> {
        let session = load_session(model_path)?;
        info!(
            "loaded face-detection model {} (threshold={threshold})",
            model_path.display()
        );
        Ok(Self {
            session: Mutex::new(session),
            anchors: generate_anchors(),
            threshold,
        })
    }

    /// Finds the highest-scoring face in `image`, if any clears the threshold.
    pub fn detect(&self, image: &RgbImage) -> Result<Option<FaceBox>, DetectionError> {
        let side = i64::from(DETECTOR_INPUT_SIZE);
        let input = Tensor::from_array((vec![1_i64, 3, side, side], preprocess(image)))
            .map_err(backend)?;

        let (regressors, scores) = {
            let mut session = lock_model(&self.session);
            let outputs = session.run(ort::inputs![input]).map_err(backend)?;
            if outputs.len() < 2 {
                return Err(DetectionError::Backend(format!(
                    "face detector expected 2 outputs, got {}",
                    outputs.len()
                )));
            }
            let regressors = outputs.get(REGRESSORS).unwrap_or(&outputs[0]);
            let scores = outputs.get(CLASSIFICATORS).unwrap_or(&outputs[1]);
            let (_, regressors) = regressors.try_extract_tensor::<f32>().map_err(backend)?;
            let (_, scores) = scores.try_extract_tensor::<f32>().map_err(backend)?;
            (regressors.to_vec(), scores.to_vec())
        };

        let face = decode_best(&regressors, &scores, &self.anchors, self.threshold);
        match &face {
            Some(face) => debug!("face at ({:.3}, {:.3}) score {:.3}", face.cx, face.cy, face.score),
            None => debug!("no face above detection threshold"),
        }
        Ok(face)
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Anchor centres of the short-range model: a 16×16 grid with 2 anchors per
/// cell followed by an 8×8 grid with 6.
fn generate_anchors() -> Vec<[f32; 2]> {
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);
    for (stride, per_cell) in [(8_u32, 2), (16, 6)] {
        let grid = DETECTOR_INPUT_SIZE / stride;
        for y in 0..grid {
            for x in 0..grid {
                let centre = [
                    (x as f32 + 0.5) / grid as f32,
                    (y as f32 + 0.5) / grid as f32,
                ];
                anchors.extend(std::iter::repeat(centre).take(per_cell));
            }
        }
    }
    anchors
}

/// Picks the anchor with the highest score at or above `threshold`.
fn decode_best(
    regressors: &[f32],
    scores: &[f32],
    anchors: &[[f32; 2]],
    threshold: f32,
) -> Option<FaceBox> {
    let scale = DETECTOR_INPUT_SIZE as f32;
    scores
        .iter()
        .zip(anchors)
        .enumerate()
        .filter_map(|(i, (&logit, anchor))| {
            let score = sigmoid(logit);
            let reg = regressors.get(i * REGRESSOR_STRIDE..i * REGRESSOR_STRIDE + 4)?;
            (score >= threshold).then(|| FaceBox {
                cx: anchor[0] + reg[0] / scale,
                cy: anchor[1] + reg[1] / scale,
                width: reg[2] / scale,
                height: reg[3] / scale,
                score,
            })
        })
        .max_by(|a, b| a.score.total_cmp(&b.score))
}

/// Resizes to the detector input and flattens to planar NCHW floats in
/// `[0, 1]`.
fn preprocess(image: &RgbImage) -> Vec<f32> {
    let resized = image::imageops::resize(
        image,
        DETECTOR_INPUT_SIZE,
        DETECTOR_INPUT_SIZE,
        FilterType::Triangle,
    );
    let plane = (DETECTOR_INPUT_SIZE * DETECTOR_INPUT_SIZE) as usize;
    let mut input = vec![0.0_f32; 3 * plane];
    for (i, pixel) in resized.pixels().enumerate() {
        for (c, value) in pixel.0.iter().enumerate() {
            input[c * plane + i] = f32::from(*value) / 255.0;
        }
    }
    input
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn face(cx: f32, cy: f32, width: f32, height: f32) -> FaceBox {
        FaceBox {
            cx,
            cy,
            width,
            height,
            score: 0.9,
        }
    }

    #[test]
    fn test_anchor_count_and_range() {
        let anchors = generate_anchors();

        assert_eq!(anchors.len(), NUM_ANCHORS);
        assert!(anchors
            .iter()
            .all(|a| a[0] > 0.0 && a[0] < 1.0 && a[1] > 0.0 && a[1] < 1.0));
        assert_eq!(anchors[0], [1.0 / 32.0, 1.0 / 32.0]);
        assert_eq!(anchors[512], [1.0 / 16.0, 1.0 / 16.0]);
    }

    #[test]
    fn test_preprocess_is_planar_unit_range() {
        let image = RgbImage::from_pixel(300, 200, Rgb([255, 0, 51]));

        let input = preprocess(&image);

        let plane = 128 * 128;
        assert_eq!(input.len(), 3 * plane);
        assert_eq!(input[0], 1.0);
        assert_eq!(input[plane], 0.0);
        assert_eq!(input[2 * plane], 0.2);
    }

    #[test]
    fn test_decode_picks_highest_score_and_applies_offsets() {
        // Arrange: two anchors clear the threshold, the second is stronger.
        let anchors = generate_anchors();
        let mut regressors = vec![0.0_f32; NUM_ANCHORS * REGRESSOR_STRIDE];
        let mut scores = vec![-10.0_f32; NUM_ANCHORS];
        scores[3] = 1.0;
        scores[700] = 4.0;
        regressors[700 * REGRESSOR_STRIDE..700 * REGRESSOR_STRIDE + 4]
            .copy_from_slice(&[16.0, -8.0, 64.0, 32.0]);

        // Act
        let best = decode_best(&regressors, &scores, &anchors, 0.5).unwrap();

        // Assert
        assert_eq!(best.cx, anchors[700][0] + 0.125);
        assert_eq!(best.cy, anchors[700][1] - 0.0625);
        assert_eq!((best.width, best.height), (0.5, 0.25));
        assert!(best.score > 0.98);
    }

    #[test]
    fn test_decode_below_threshold_finds_nothing() {
        let anchors = generate_anchors();
        let regressors = vec![0.0_f32; NUM_ANCHORS * REGRESSOR_STRIDE];
        let scores = vec![-3.0_f32; NUM_ANCHORS];

        assert_eq!(decode_best(&regressors, &scores, &anchors, 0.5), None);
    }

    #[test]
    fn test_decode_ignores_anchors_without_regressors() {
        let anchors = generate_anchors();
        let scores = vec![5.0_f32; NUM_ANCHORS];

        assert_eq!(decode_best(&[], &scores, &anchors, 0.5), None);
    }

    #[test]
    fn test_roi_is_enlarged_square_around_face() {
        let roi = face(0.5, 0.5, 0.25, 0.25).roi(640, 640).unwrap();

        assert_eq!(
            roi,
            Roi {
                x: 200,
                y: 200,
                width: 240,
                height: 240
            }
        );
    }

    #[test]
    fn test_roi_uses_longer_pixel_side_on_wide_frames() {
        // 0.25 of 640 wide is 160 px, 0.25 of 480 high is 120 px.
        let roi = face(0.5, 0.5, 0.25, 0.25).roi(640, 480).unwrap();

        assert_eq!((roi.width, roi.height), (240, 240));
        assert_eq!((roi.x, roi.y), (200, 120));
    }

    #[test]
    fn test_roi_is_clipped_to_frame() {
        let roi = face(0.05, 0.95, 0.2, 0.2).roi(100, 100).unwrap();

        assert_eq!(
            roi,
            Roi {
                x: 0,
                y: 80,
                width: 20,
                height: 20
            }
        );
    }

    #[test]
    fn test_roi_outside_frame_is_none() {
        assert_eq!(face(3.0, 3.0, 0.1, 0.1).roi(100, 100), None);
    }

    #[test]
    fn test_missing_model_file_is_backend_error() {
        let result = BlazeFaceDetector::load(Path::new("/nonexistent/blazeface.onnx"), 0.5);
        assert!(matches!(result, Err(DetectionError::Backend(_))));
    }
}
