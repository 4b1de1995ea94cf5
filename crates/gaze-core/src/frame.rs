//! Frame decoding: encoded still image bytes → pixel grid.
//!
//! The client encodes each camera frame (typically JPEG or PNG) before
//! sending it.  Decoding is delegated to the `image` crate, which sniffs the
//! format from the leading magic bytes, so any codec enabled in `image` is
//! accepted.
//!
//! The decoded frame keeps whatever colour layout the file carried (grey,
//! RGBA, 16-bit, ...).  The landmark model needs 8-bit RGB, so callers must go
//! through [`DecodedFrame::to_rgb`] before detection.

use image::{DynamicImage, RgbImage};
use thiserror::Error;

/// Errors produced while turning bytes into a pixel grid.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame payload contained no bytes at all.
    #[error("empty frame buffer")]
    Empty,

    /// The bytes are truncated, corrupt, or in a format no enabled codec
    /// recognises.
    #[error("{0}")]
    Malformed(#[from] image::ImageError),
}

/// A successfully decoded still image.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    image: DynamicImage,
}

impl DecodedFrame {
    /// Width `w` of the frame in pixels.
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height `h` of the frame in pixels.
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Converts the frame to the 8-bit, 3-channel RGB layout expected by the
    /// landmark detector.
    ///
    /// Frames that are already RGB8 are copied; every other colour type is
    /// converted (alpha dropped, grey expanded, 16-bit narrowed).
    pub fn to_rgb(&self) -> RgbImage {
        self.image.to_rgb8()
    }
}

impl From<DynamicImage> for DecodedFrame {
    fn from(image: DynamicImage) -> Self {
        Self { image }
    }
}

/// Decodes one encoded still image.
///
/// # Errors
///
/// - [`DecodeError::Empty`] if `bytes` is empty.
/// - [`DecodeError::Malformed`] if the codec rejects the data.
///
/// # Example
///
/// ```rust
/// use gaze_core::frame::{decode_frame, DecodeError};
///
/// let err = decode_frame(&[0x13, 0x37, 0x00, 0x42]).unwrap_err();
/// assert!(matches!(err, DecodeError::Malformed(_)));
/// ```
pub fn decode_frame(bytes: &[u8]) -> Result<DecodedFrame, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let image = image::load_from_memory(bytes)?;
    Ok(DecodedFrame { image })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma, Rgb, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_decode_png_reports_dimensions() {
        // Arrange
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([10, 20, 30])));
        let bytes = encode(&img, ImageFormat::Png);

        // Act
        let frame = decode_frame(&bytes).unwrap();

        // Assert
        assert_eq!(frame.width(), 64);
        assert_eq!(frame.height(), 48);
    }

    #[test]
    fn test_decode_jpeg_succeeds() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 16, Rgb([200, 100, 50])));
        let bytes = encode(&img, ImageFormat::Jpeg);

        let frame = decode_frame(&bytes).unwrap();

        assert_eq!((frame.width(), frame.height()), (32, 16));
    }

    #[test]
    fn test_decode_empty_buffer_is_empty_error() {
        let err = decode_frame(&[]).unwrap_err();
        assert!(matches!(err, DecodeError::Empty));
    }

    #[test]
    fn test_decode_random_bytes_is_malformed() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A];

        let err = decode_frame(&bytes).unwrap_err();

        assert!(matches!(err, DecodeError::Malformed(_)));
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn test_decode_truncated_png_fails() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([1, 2, 3])));
        let bytes = encode(&img, ImageFormat::Png);

        // Keep the signature and part of the IHDR chunk only.
        let result = decode_frame(&bytes[..20]);

        assert!(result.is_err());
    }

    #[test]
    fn test_to_rgb_drops_alpha() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([9, 8, 7, 0])));
        let frame = DecodedFrame::from(img);

        let rgb = frame.to_rgb();

        assert_eq!(rgb.get_pixel(0, 0), &Rgb([9, 8, 7]));
    }

    #[test]
    fn test_to_rgb_expands_grey() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(2, 2, Luma([77])));
        let frame = DecodedFrame::from(img);

        let rgb = frame.to_rgb();

        assert_eq!(rgb.get_pixel(1, 1), &Rgb([77, 77, 77]));
    }
}
