//! Integration tests for the public frame pipeline.
//!
//! These tests drive [`FramePipeline`] through its public API with a
//! deterministic stand-in detector, checking the properties the server relies
//! on:
//!
//! - Undecodable input always fails as a decode failure, never a panic.
//! - Blank frames with no face produce `NotFound`, not an error.
//! - Decoding and estimating the same bytes twice yields identical values.
//! - A 640×480 frontal face lands inside the frame.

use std::io::Cursor;
use std::sync::Arc;

use gaze_core::landmarks::REFINED_FACE_MESH_LANDMARKS;
use gaze_core::{
    DetectionError, FramePipeline, FrameProcessor, GazeOutcome, LandmarkDetector, LandmarkPoint,
    LandmarkSet,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

/// Reports a face whenever the frame has any non-black pixel.
///
/// The face sits where a frontal face would: eyes at roughly 35% / 65% of the
/// width and 40% of the height.
struct BrightFaceDetector;

impl LandmarkDetector for BrightFaceDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<LandmarkSet>, DetectionError> {
        if image.pixels().all(|p| p.0 == [0, 0, 0]) {
            return Ok(Vec::new());
        }
        let mut points = vec![LandmarkPoint::new(0.5, 0.5); REFINED_FACE_MESH_LANDMARKS];
        points[145] = LandmarkPoint::new(0.351, 0.412);
        points[159] = LandmarkPoint::new(0.349, 0.388);
        points[374] = LandmarkPoint::new(0.652, 0.413);
        points[386] = LandmarkPoint::new(0.648, 0.389);
        Ok(vec![LandmarkSet::new(points)])
    }
}

fn pipeline() -> FramePipeline {
    FramePipeline::new(Arc::new(BrightFaceDetector))
}

fn encode(image: RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buf, format)
        .expect("encode test image");
    buf.into_inner()
}

fn portrait_frame() -> RgbImage {
    RgbImage::from_fn(640, 480, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]))
}

#[test]
fn test_frontal_face_lands_inside_640x480_frame() {
    let bytes = encode(portrait_frame(), ImageFormat::Jpeg);

    let outcome = pipeline().process(&bytes).expect("pipeline must succeed");

    let GazeOutcome::Found(gaze) = outcome else {
        panic!("expected a gaze estimate, got {outcome:?}");
    };
    for x in [gaze.gaze_left_x, gaze.gaze_right_x] {
        assert!(x.is_finite() && (0.0..640.0).contains(&x), "x out of range: {x}");
    }
    for y in [gaze.gaze_left_y, gaze.gaze_right_y] {
        assert!(y.is_finite() && (0.0..480.0).contains(&y), "y out of range: {y}");
    }
    assert!(gaze.gaze_left_x < gaze.gaze_right_x);
}

#[test]
fn test_same_bytes_twice_give_identical_estimates() {
    let bytes = encode(portrait_frame(), ImageFormat::Png);
    let pipeline = pipeline();

    let first = pipeline.process(&bytes).unwrap();
    let second = pipeline.process(&bytes).unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_black_frame_is_not_found() {
    let bytes = encode(RgbImage::new(320, 240), ImageFormat::Png);

    let outcome = pipeline().process(&bytes).unwrap();

    assert_eq!(outcome, GazeOutcome::NotFound);
}

#[test]
fn test_undecodable_inputs_fail_as_decode_errors() {
    let png = encode(portrait_frame(), ImageFormat::Png);
    let cases: Vec<Vec<u8>> = vec![
        Vec::new(),
        vec![0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55],
        png[..png.len() / 8].to_vec(),
    ];

    for bytes in cases {
        let err = pipeline()
            .process(&bytes)
            .expect_err("undecodable input must fail");
        assert!(err.is_decode_failure(), "wrong failure kind: {err}");
    }
}
