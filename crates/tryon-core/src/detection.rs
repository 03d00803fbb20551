//! Landmark detector glue.
//!
//! The detector itself is an external service. This module prepares its
//! input, parses its output, and defines the ticket used to match a
//! completion to the photo it was requested for.

use std::fmt;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, imageops};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::{LandmarkPair, Point};

/// Scale of the coordinates returned by the detector (0..=1000).
pub const DETECTOR_COORDINATE_SCALE: f32 = 1000.0;

/// Error type for detector input preparation and response parsing.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("Invalid detector response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Detector coordinate {value} outside 0..={max}")]
    OutOfRange { value: f32, max: f32 },
    #[error("Failed to encode detector input: {0}")]
    Encode(#[from] image::ImageError),
}

/// Identity of one base photo within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhotoId(Uuid);

impl PhotoId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PhotoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Handle for one in-flight detection request.
///
/// A completion is only applied when its ticket still matches the
/// session's current photo and latest request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DetectionTicket {
    pub photo: PhotoId,
    pub request: u64,
}

/// Result of handing a detector completion to the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectionOutcome {
    /// Landmarks cached and the overlay auto-aligned.
    Aligned(LandmarkPair),
    /// Landmarks cached but not applied: the overlay is hidden, no asset is
    /// selected, or a manual edit made while the request was in flight
    /// turned auto-alignment off.
    Cached(LandmarkPair),
    /// Detector found no face; the current transform is kept.
    NoLandmarks,
    /// Detector returned unusable geometry; treated as no face.
    Degenerate,
    /// Result belongs to a photo or request that is no longer current.
    Stale,
}

#[derive(Debug, Deserialize)]
struct RawPoint {
    x: f32,
    y: f32,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    left_eye: Option<RawPoint>,
    right_eye: Option<RawPoint>,
}

fn normalize(raw: &RawPoint) -> Result<Point, DetectionError> {
    for value in [raw.x, raw.y] {
        if !(0.0..=DETECTOR_COORDINATE_SCALE).contains(&value) {
            return Err(DetectionError::OutOfRange {
                value,
                max: DETECTOR_COORDINATE_SCALE,
            });
        }
    }
    Ok(Point::new(
        raw.x / DETECTOR_COORDINATE_SCALE,
        raw.y / DETECTOR_COORDINATE_SCALE,
    ))
}

/// Parses a detector response of the form
/// `{ "left_eye": {"x", "y"}, "right_eye": {"x", "y"} }` on a 0..1000 scale.
///
/// An empty body, `null`, or a response missing either eye means no face
/// was found. The returned pair is in image order whichever way the
/// detector labelled the eyes.
pub fn parse_detector_response(body: &str) -> Result<Option<LandmarkPair>, DetectionError> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(None);
    }

    let Some(raw) = serde_json::from_str::<Option<RawResponse>>(body)? else {
        return Ok(None);
    };
    let (Some(left), Some(right)) = (raw.left_eye, raw.right_eye) else {
        return Ok(None);
    };

    Ok(Some(
        LandmarkPair::new(normalize(&left)?, normalize(&right)?).image_ordered(),
    ))
}

/// Target size that fits `(width, height)` within `max_dim` on its longest
/// side, preserving aspect ratio. Never upscales.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn detection_input_size(width: u32, height: u32, max_dim: u32) -> (u32, u32) {
    if width <= max_dim && height <= max_dim {
        return (width, height);
    }
    let ratio = (max_dim as f32 / width as f32).min(max_dim as f32 / height as f32);
    (
        ((width as f32 * ratio).round() as u32).max(1),
        ((height as f32 * ratio).round() as u32).max(1),
    )
}

/// Downsizes the photo for the detector and encodes it as JPEG.
pub fn prepare_detection_input(
    photo: &DynamicImage,
    max_dim: u32,
    quality: u8,
) -> Result<Vec<u8>, DetectionError> {
    let (w, h) = detection_input_size(photo.width(), photo.height(), max_dim);
    let rgb = if (w, h) == (photo.width(), photo.height()) {
        photo.to_rgb8()
    } else {
        imageops::resize(&photo.to_rgb8(), w, h, imageops::FilterType::Triangle)
    };

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100)).encode_image(&rgb)?;
    tracing::debug!(
        "[detection] prepared {}x{} -> {}x{} ({} bytes)",
        photo.width(),
        photo.height(),
        w,
        h,
        bytes.len()
    );
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_thousandths() {
        let pair = parse_detector_response(
            r#"{ "left_eye": { "x": 350, "y": 500 }, "right_eye": { "x": 650, "y": 500 } }"#,
        )
        .unwrap()
        .unwrap();
        assert!((pair.left_eye.x - 0.35).abs() < 1e-6);
        assert!((pair.left_eye.y - 0.5).abs() < 1e-6);
        assert!((pair.right_eye.x - 0.65).abs() < 1e-6);
    }

    #[test]
    fn test_parse_orders_subject_labelled_eyes() {
        let pair = parse_detector_response(
            r#"{ "left_eye": { "x": 650, "y": 500 }, "right_eye": { "x": 350, "y": 500 } }"#,
        )
        .unwrap()
        .unwrap();
        assert!((pair.left_eye.x - 0.35).abs() < 1e-6);
        assert!((pair.right_eye.x - 0.65).abs() < 1e-6);
    }

    #[test]
    fn test_parse_no_face() {
        assert_eq!(parse_detector_response("").unwrap(), None);
        assert_eq!(parse_detector_response("null").unwrap(), None);
        assert_eq!(
            parse_detector_response(r#"{ "left_eye": { "x": 1, "y": 2 } }"#).unwrap(),
            None
        );
    }

    #[test]
    fn test_parse_rejects_out_of_range() {
        let err = parse_detector_response(
            r#"{ "left_eye": { "x": 1200, "y": 500 }, "right_eye": { "x": 650, "y": 500 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, DetectionError::OutOfRange { .. }));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_detector_response("not json"),
            Err(DetectionError::Json(_))
        ));
    }

    #[test]
    fn test_detection_input_size() {
        assert_eq!(detection_input_size(400, 300, 600), (400, 300));
        assert_eq!(detection_input_size(1200, 800, 600), (600, 400));
        assert_eq!(detection_input_size(1000, 3000, 600), (200, 600));
        assert_eq!(detection_input_size(600, 600, 600), (600, 600));
    }

    #[test]
    fn test_prepare_detection_input() {
        let photo = DynamicImage::new_rgb8(1200, 900);
        let bytes = prepare_detection_input(&photo, 600, 70).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (600, 450));
    }

    #[test]
    fn test_photo_ids_are_unique() {
        assert_ne!(PhotoId::new(), PhotoId::new());
    }
}
