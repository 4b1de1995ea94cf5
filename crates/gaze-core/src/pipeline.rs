//! The per-frame pipeline: decode → RGB conversion → detect → estimate.
//!
//! [`FramePipeline`] is the production composition of the three stages.  The
//! server programs against the [`FrameProcessor`] trait instead, so sessions
//! can be exercised with scripted processors in tests.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::frame::{decode_frame, DecodeError};
use crate::gaze::{estimate_gaze, EstimateError, GazeOutcome};
use crate::landmarks::{DetectionError, LandmarkDetector};

/// A failure in any pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("landmark detection failed: {0}")]
    Detection(#[from] DetectionError),

    #[error("gaze estimation failed: {0}")]
    Estimate(#[from] EstimateError),
}

impl PipelineError {
    /// `true` when the input bytes were not a decodable image, as opposed to
    /// a fault further down the pipeline.
    pub fn is_decode_failure(&self) -> bool {
        matches!(self, PipelineError::Decode(_))
    }
}

/// Turns one encoded frame into a gaze outcome.
///
/// Implementations are shared across sessions and called from blocking worker
/// threads, so they must be `Send + Sync`.
pub trait FrameProcessor: Send + Sync {
    fn process(&self, bytes: &[u8]) -> Result<GazeOutcome, PipelineError>;
}

/// The standard pipeline backed by a shared landmark detector.
#[derive(Clone)]
pub struct FramePipeline {
    detector: Arc<dyn LandmarkDetector>,
}

impl FramePipeline {
    pub fn new(detector: Arc<dyn LandmarkDetector>) -> Self {
        Self { detector }
    }
}

impl FrameProcessor for FramePipeline {
    fn process(&self, bytes: &[u8]) -> Result<GazeOutcome, PipelineError> {
        let frame = decode_frame(bytes)?;
        let (w, h) = (frame.width(), frame.height());

        // The decoder keeps the file's colour layout; the model wants RGB8.
        let rgb = frame.to_rgb();
        let faces = self.detector.detect(&rgb)?;
        debug!("decoded {w}x{h} frame, {} face(s) detected", faces.len());

        Ok(estimate_gaze(&faces, w, h)?)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::{LandmarkPoint, LandmarkSet};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage, RgbaImage};
    use mockall::mock;
    use std::io::Cursor;

    mock! {
        pub Detector {}
        impl LandmarkDetector for Detector {
            fn detect(&self, image: &RgbImage) -> Result<Vec<LandmarkSet>, DetectionError>;
        }
    }

    fn png_bytes(image: DynamicImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn centred_face() -> LandmarkSet {
        LandmarkSet::new(vec![LandmarkPoint::new(0.5, 0.25); 478])
    }

    #[test]
    fn test_pipeline_scales_landmarks_by_frame_size() {
        // Arrange
        let mut detector = MockDetector::new();
        detector
            .expect_detect()
            .times(1)
            .returning(|_| Ok(vec![centred_face()]));
        let pipeline = FramePipeline::new(Arc::new(detector));
        let bytes = png_bytes(DynamicImage::ImageRgb8(RgbImage::new(640, 480)));

        // Act
        let outcome = pipeline.process(&bytes).unwrap();

        // Assert
        let GazeOutcome::Found(gaze) = outcome else {
            panic!("expected a gaze estimate");
        };
        assert_eq!(gaze.gaze_left_x, 320.0);
        assert_eq!(gaze.gaze_left_y, 120.0);
        assert_eq!(gaze.gaze_right_x, 320.0);
        assert_eq!(gaze.gaze_right_y, 120.0);
    }

    #[test]
    fn test_pipeline_no_face_is_not_found() {
        let mut detector = MockDetector::new();
        detector.expect_detect().returning(|_| Ok(Vec::new()));
        let pipeline = FramePipeline::new(Arc::new(detector));
        let bytes = png_bytes(DynamicImage::ImageRgb8(RgbImage::new(8, 8)));

        let outcome = pipeline.process(&bytes).unwrap();

        assert_eq!(outcome, GazeOutcome::NotFound);
    }

    #[test]
    fn test_pipeline_hands_rgb_to_detector() {
        // An RGBA source must reach the detector as RGB with the same pixels.
        let mut detector = MockDetector::new();
        detector
            .expect_detect()
            .withf(|img: &RgbImage| img.dimensions() == (3, 2) && img.get_pixel(0, 0) == &Rgb([1, 2, 3]))
            .times(1)
            .returning(|_| Ok(Vec::new()));
        let pipeline = FramePipeline::new(Arc::new(detector));
        let rgba = RgbaImage::from_pixel(3, 2, image::Rgba([1, 2, 3, 255]));
        let bytes = png_bytes(DynamicImage::ImageRgba8(rgba));

        assert!(pipeline.process(&bytes).is_ok());
    }

    #[test]
    fn test_pipeline_decode_failure_skips_detector() {
        let mut detector = MockDetector::new();
        detector.expect_detect().never();
        let pipeline = FramePipeline::new(Arc::new(detector));

        let err = pipeline.process(b"not an image").unwrap_err();

        assert!(err.is_decode_failure());
    }

    #[test]
    fn test_pipeline_detector_failure_is_not_decode_failure() {
        let mut detector = MockDetector::new();
        detector
            .expect_detect()
            .returning(|_| Err(DetectionError::Backend("session crashed".to_string())));
        let pipeline = FramePipeline::new(Arc::new(detector));
        let bytes = png_bytes(DynamicImage::ImageRgb8(RgbImage::new(4, 4)));

        let err = pipeline.process(&bytes).unwrap_err();

        assert!(!err.is_decode_failure());
        assert!(err.to_string().contains("session crashed"));
    }

    #[test]
    fn test_pipeline_truncated_landmarks_surface_as_estimate_error() {
        let mut detector = MockDetector::new();
        detector
            .expect_detect()
            .returning(|_| Ok(vec![LandmarkSet::new(vec![LandmarkPoint::default(); 10])]));
        let pipeline = FramePipeline::new(Arc::new(detector));
        let bytes = png_bytes(DynamicImage::ImageRgb8(RgbImage::new(4, 4)));

        let err = pipeline.process(&bytes).unwrap_err();

        assert!(matches!(err, PipelineError::Estimate(_)));
    }
}
