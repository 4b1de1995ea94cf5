//! Face-mesh landmark detector backed by ONNX Runtime.
//!
//! Runs two models per frame, the way MediaPipe's face-mesh graph does:
//!
//! 1. [`BlazeFaceDetector`] locates the face in the full frame.
//! 2. The region around it is cropped and resized to the 192×192 input of
//!    the face-landmark model.
//! 3. Mesh points come back in crop pixels and are mapped to the full frame,
//!    then normalised by its width and height.
//!
//! A frame where the detector finds nothing yields no face without running
//! the mesh model.
//!
//! # Model contract
//!
//! - Input: `[1, 192, 192, 3]` float32, RGB, values in `[0, 1]` (NHWC).
//! - Mesh: `output_mesh_identity` (attention model) or `conv2d_21` (base
//!   model), at least `468 × 3` floats, `x, y, z` per point in input pixels.
//!   Falls back to output 0 when neither name is present.
//! - Face flag: `conv_faceflag` or `conv2d_31`, a presence logit.  Only read
//!   by name; exports without it report every detected face.
//! - Irises (attention model only): `output_left_iris` and
//!   `output_right_iris`, 5 points each.  They become indices 468..478 when
//!   refinement is enabled.
//!
//! The `ort` sessions need `&mut` access to run, so each sits behind a
//! `Mutex`.  Only inference is serialised; decoding and estimation for other
//! sessions continue in parallel.

use std::path::Path;
use std::sync::Mutex;

use gaze_core::landmarks::FACE_MESH_LANDMARKS;
use gaze_core::{DetectionError, DetectorOptions, LandmarkDetector, LandmarkPoint, LandmarkSet};
use image::{imageops::FilterType, RgbImage};
use ort::session::Session;
use ort::value::{DynValue, Tensor};
use tracing::{debug, info};

use super::face_detection::{BlazeFaceDetector, Roi};
use super::onnx::{backend, load_session, lock_model, sigmoid};

/// Side length of the square model input.
pub const MESH_INPUT_SIZE: u32 = 192;

/// Points per iris in the attention model's iris outputs.
const IRIS_POINTS: usize = 5;

const MESH_OUTPUTS: [&str; 2] = ["output_mesh_identity", "conv2d_21"];
const FACE_FLAG_OUTPUTS: [&str; 2] = ["conv_faceflag", "conv2d_31"];
const LEFT_IRIS_OUTPUT: &str = "output_left_iris";
const RIGHT_IRIS_OUTPUT: &str = "output_right_iris";

/// ONNX Runtime face detector plus face-mesh landmark model.
pub struct OnnxFaceMesh {
    faces: BlazeFaceDetector,
    mesh: Mutex<Session>,
    options: DetectorOptions,
}

/// Raw mesh model outputs for one crop.
#[derive(Debug, Default)]
struct MeshTensors {
    mesh: Vec<f32>,
    face_flag: Option<f32>,
    left_iris: Option<Vec<f32>>,
    right_iris: Option<Vec<f32>>,
}

impl OnnxFaceMesh {
    /// Loads the landmark model at `mesh_path` and the face detector at
    /// `face_path`.
    ///
    /// # Errors
    ///
    /// Returns [`DetectionError::Backend`] if either file is missing or is
    /// not a loadable ONNX model.
    pub fn load(
        mesh_path: &Path,
        face_path: &Path,
        options: DetectorOptions,
    ) -> Result<Self, DetectionError> {
        let faces = BlazeFaceDetector::load(face_path, options.detection_threshold)?;
        let mesh = load_session(mesh_path)?;
        info!(
            "loaded face-mesh model {} (refine_landmarks={}, presence_threshold={})",
            mesh_path.display(),
            options.refine_landmarks,
            options.presence_threshold
        );
        Ok(Self {
            faces,
            mesh: Mutex::new(mesh),
            options,
        })
    }

    fn run_mesh(&self, crop: &RgbImage) -> Result<MeshTensors, DetectionError> {
        let side = i64::from(MESH_INPUT_SIZE);
        let input = Tensor::from_array((vec![1_i64, side, side, 3], preprocess(crop)))
            .map_err(backend)?;

        let mut session = lock_model(&self.mesh);
        let outputs = session.run(ort::inputs![input]).map_err(backend)?;
        if outputs.len() == 0 {
            return Err(DetectionError::Backend(
                "face-mesh model produced no outputs".to_string(),
            ));
        }

        let mesh = floats(
            MESH_OUTPUTS
                .iter()
                .find_map(|name| outputs.get(*name))
                .unwrap_or(&outputs[0]),
        )?;
        let face_flag = match FACE_FLAG_OUTPUTS.iter().find_map(|name| outputs.get(*name)) {
            Some(value) => floats(value)?.first().copied(),
            None => None,
        };
        let left_iris = outputs.get(LEFT_IRIS_OUTPUT).map(floats).transpose()?;
        let right_iris = outputs.get(RIGHT_IRIS_OUTPUT).map(floats).transpose()?;

        Ok(MeshTensors {
            mesh,
            face_flag,
            left_iris,
            right_iris,
        })
    }
}

impl LandmarkDetector for OnnxFaceMesh {
    fn detect(&self, image: &RgbImage) -> Result<Vec<LandmarkSet>, DetectionError> {
        let Some(face) = self.faces.detect(image)? else {
            return Ok(Vec::new());
        };
        let Some(roi) = face.roi(image.width(), image.height()) else {
            debug!("face box lies outside the frame");
            return Ok(Vec::new());
        };

        let crop = image::imageops::crop_imm(image, roi.x, roi.y, roi.width, roi.height).to_image();
        let tensors = self.run_mesh(&crop)?;
        decode_landmarks(&tensors, &roi, (image.width(), image.height()), &self.options)
    }
}

fn floats(value: &DynValue) -> Result<Vec<f32>, DetectionError> {
    let (_, data) = value.try_extract_tensor::<f32>().map_err(backend)?;
    Ok(data.to_vec())
}

/// Resizes to the model input and flattens to NHWC floats in `[0, 1]`.
fn preprocess(image: &RgbImage) -> Vec<f32> {
    let resized = image::imageops::resize(
        image,
        MESH_INPUT_SIZE,
        MESH_INPUT_SIZE,
        FilterType::Triangle,
    );
    resized
        .pixels()
        .flat_map(|p| p.0)
        .map(|c| f32::from(c) / 255.0)
        .collect()
}

/// Converts mesh outputs for the crop `roi` into zero or one landmark sets
/// normalised to the full `frame`.
fn decode_landmarks(
    tensors: &MeshTensors,
    roi: &Roi,
    frame: (u32, u32),
    options: &DetectorOptions,
) -> Result<Vec<LandmarkSet>, DetectionError> {
    if let Some(logit) = tensors.face_flag {
        let presence = sigmoid(logit);
        if presence < options.presence_threshold {
            debug!("face presence {presence:.3} below threshold");
            return Ok(Vec::new());
        }
    }

    let needed = FACE_MESH_LANDMARKS * 3;
    if tensors.mesh.len() < needed {
        return Err(DetectionError::UnexpectedOutput {
            expected: needed,
            actual: tensors.mesh.len(),
        });
    }

    let to_frame = CropMapping::new(roi, frame);
    let mut points: Vec<LandmarkPoint> = tensors.mesh[..needed]
        .chunks_exact(3)
        .map(|c| to_frame.point(c[0], c[1], c[2]))
        .collect();

    if options.refine_landmarks {
        match (&tensors.left_iris, &tensors.right_iris) {
            (Some(left), Some(right)) => {
                points.extend(iris_points(left, &to_frame)?);
                points.extend(iris_points(right, &to_frame)?);
            }
            // Some exports append the iris points to the mesh output instead.
            _ => points.extend(
                tensors.mesh[needed..]
                    .chunks_exact(3)
                    .take(2 * IRIS_POINTS)
                    .map(|c| to_frame.point(c[0], c[1], c[2])),
            ),
        }
    }

    Ok(vec![LandmarkSet::new(points)])
}

/// Decodes one iris output of `x, y` or `x, y, z` per point.
fn iris_points(raw: &[f32], to_frame: &CropMapping) -> Result<Vec<LandmarkPoint>, DetectionError> {
    let stride = raw.len() / IRIS_POINTS;
    if stride < 2 || raw.len() % IRIS_POINTS != 0 {
        return Err(DetectionError::UnexpectedOutput {
            expected: IRIS_POINTS * 2,
            actual: raw.len(),
        });
    }
    Ok(raw
        .chunks_exact(stride)
        .map(|c| to_frame.point(c[0], c[1], c.get(2).copied().unwrap_or(0.0)))
        .collect())
}

/// Maps model-input pixels of a crop to coordinates normalised to the frame.
struct CropMapping {
    offset: (f32, f32),
    scale: (f32, f32),
    frame: (f32, f32),
}

impl CropMapping {
    fn new(roi: &Roi, (width, height): (u32, u32)) -> Self {
        let input = MESH_INPUT_SIZE as f32;
        Self {
            offset: (roi.x as f32, roi.y as f32),
            scale: (roi.width as f32 / input, roi.height as f32 / input),
            frame: (width as f32, height as f32),
        }
    }

    fn point(&self, x: f32, y: f32, z: f32) -> LandmarkPoint {
        LandmarkPoint {
            x: (self.offset.0 + x * self.scale.0) / self.frame.0,
            y: (self.offset.1 + y * self.scale.1) / self.frame.1,
            z: z * self.scale.0 / self.frame.0,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// A crop whose model pixels map 1:1 horizontally and 1:2 vertically.
    const ROI: Roi = Roi {
        x: 100,
        y: 50,
        width: 192,
        height: 96,
    };
    const FRAME: (u32, u32) = (400, 200);

    fn mesh_only(value: f32) -> MeshTensors {
        MeshTensors {
            mesh: vec![value; FACE_MESH_LANDMARKS * 3],
            ..MeshTensors::default()
        }
    }

    fn with_irises(mut tensors: MeshTensors) -> MeshTensors {
        tensors.left_iris = Some(vec![0.0; 10]);
        tensors.right_iris = Some(vec![192.0; 10]);
        tensors
    }

    #[test]
    fn test_preprocess_produces_nhwc_unit_range() {
        let image = RgbImage::from_pixel(640, 480, Rgb([255, 0, 51]));

        let input = preprocess(&image);

        assert_eq!(input.len(), 192 * 192 * 3);
        assert_eq!(&input[..3], &[1.0, 0.0, 0.2]);
    }

    #[test]
    fn test_points_are_mapped_from_crop_to_full_frame() {
        // Arrange
        let mut tensors = mesh_only(96.0);
        tensors.mesh[..3].copy_from_slice(&[0.0, 0.0, 0.0]);
        tensors.mesh[3..6].copy_from_slice(&[192.0, 192.0, 0.0]);

        // Act
        let faces = decode_landmarks(&tensors, &ROI, FRAME, &DetectorOptions::default()).unwrap();

        // Assert
        let face = &faces[0];
        assert_eq!(face.get(0).map(|p| (p.x, p.y)), Some((0.25, 0.25)));
        assert_eq!(face.get(1).map(|p| (p.x, p.y)), Some((0.73, 0.73)));
        assert_eq!(face.get(2).map(|p| (p.x, p.y)), Some((0.49, 0.49)));
    }

    #[test]
    fn test_missing_face_flag_keeps_face() {
        let faces =
            decode_landmarks(&mesh_only(96.0), &ROI, FRAME, &DetectorOptions::default()).unwrap();

        assert_eq!(faces.len(), 1);
    }

    #[test]
    fn test_low_presence_means_no_face() {
        let mut tensors = mesh_only(96.0);
        tensors.face_flag = Some(-6.0);

        let faces = decode_landmarks(&tensors, &ROI, FRAME, &DetectorOptions::default()).unwrap();

        assert!(faces.is_empty());
    }

    #[test]
    fn test_high_presence_keeps_face() {
        let mut tensors = mesh_only(96.0);
        tensors.face_flag = Some(6.0);

        let faces = decode_landmarks(&tensors, &ROI, FRAME, &DetectorOptions::default()).unwrap();

        assert_eq!(faces.len(), 1);
    }

    #[test]
    fn test_iris_outputs_are_appended_when_refining() {
        let tensors = with_irises(mesh_only(96.0));

        let faces = decode_landmarks(&tensors, &ROI, FRAME, &DetectorOptions::default()).unwrap();

        let face = &faces[0];
        assert_eq!(face.len(), 478);
        assert_eq!(face.get(468).map(|p| (p.x, p.y)), Some((0.25, 0.25)));
        assert_eq!(face.get(477).map(|p| (p.x, p.y)), Some((0.73, 0.73)));
    }

    #[test]
    fn test_mesh_without_iris_outputs_still_yields_base_points() {
        let faces =
            decode_landmarks(&mesh_only(96.0), &ROI, FRAME, &DetectorOptions::default()).unwrap();

        assert_eq!(faces[0].len(), FACE_MESH_LANDMARKS);
    }

    #[test]
    fn test_iris_points_appended_to_mesh_output_are_used() {
        let tensors = MeshTensors {
            mesh: vec![96.0; 478 * 3],
            ..MeshTensors::default()
        };

        let faces = decode_landmarks(&tensors, &ROI, FRAME, &DetectorOptions::default()).unwrap();

        assert_eq!(faces[0].len(), 478);
    }

    #[test]
    fn test_unrefined_options_skip_iris_outputs() {
        let tensors = with_irises(mesh_only(96.0));
        let options = DetectorOptions {
            refine_landmarks: false,
            ..DetectorOptions::default()
        };

        let faces = decode_landmarks(&tensors, &ROI, FRAME, &options).unwrap();

        assert_eq!(faces[0].len(), FACE_MESH_LANDMARKS);
    }

    #[test]
    fn test_short_mesh_output_is_rejected() {
        let tensors = MeshTensors {
            mesh: vec![0.0; 300],
            ..MeshTensors::default()
        };

        let err = decode_landmarks(&tensors, &ROI, FRAME, &DetectorOptions::default()).unwrap_err();

        assert!(matches!(
            err,
            DetectionError::UnexpectedOutput {
                expected: 1404,
                actual: 300
            }
        ));
    }

    #[test]
    fn test_malformed_iris_output_is_rejected() {
        let mut tensors = with_irises(mesh_only(96.0));
        tensors.left_iris = Some(vec![0.0; 7]);

        let result = decode_landmarks(&tensors, &ROI, FRAME, &DetectorOptions::default());

        assert!(matches!(
            result,
            Err(DetectionError::UnexpectedOutput { expected: 10, actual: 7 })
        ));
    }

    #[test]
    fn test_missing_model_files_are_backend_errors() {
        let result = OnnxFaceMesh::load(
            Path::new("/nonexistent/face_landmark.onnx"),
            Path::new("/nonexistent/face_detection.onnx"),
            DetectorOptions::default(),
        );
        assert!(matches!(result, Err(DetectionError::Backend(_))));
    }
}
