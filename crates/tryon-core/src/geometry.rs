//! Geometry resolver: eye landmarks to overlay placement.
//!
//! Landmarks arrive normalized to `[0, 1]` on each image axis. They are
//! mapped into the container's pixel space (x by width, y by height, the
//! container need not be square), and the overlay is placed at the eye
//! midpoint, rotated along the eye line, and sized so that its physical
//! width matches the face under the assumption of an average
//! interpupillary distance.

use serde::{Deserialize, Serialize};

/// Smallest eye distance (in pixels) considered a real measurement.
const MIN_EYE_DISTANCE_PX: f32 = 1e-3;

/// A 2D point with floating-point coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Container (display surface) dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContainerSize {
    pub width: f32,
    pub height: f32,
}

impl ContainerSize {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> Point {
        Point::new(self.width / 2.0, self.height / 2.0)
    }

    /// True when both dimensions are finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    /// Maps a normalized `[0, 1]` point into this container's pixel space.
    pub fn denormalize(&self, p: Point) -> Point {
        Point::new(p.x * self.width, p.y * self.height)
    }

    /// Maps a pixel point back to normalized coordinates.
    pub fn normalize(&self, p: Point) -> Point {
        Point::new(p.x / self.width, p.y / self.height)
    }
}

/// Detected eye centers, normalized to the photo.
///
/// `left_eye` is the eye on the left side of the image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPair {
    pub left_eye: Point,
    pub right_eye: Point,
}

impl LandmarkPair {
    pub const fn new(left_eye: Point, right_eye: Point) -> Self {
        Self {
            left_eye,
            right_eye,
        }
    }

    /// The same two points with `left_eye` on the left side of the image.
    ///
    /// Detectors may label eyes from the subject's point of view, which puts
    /// the subject's left eye on the image's right.
    #[must_use]
    pub fn image_ordered(self) -> Self {
        if self.right_eye.x < self.left_eye.x {
            Self::new(self.right_eye, self.left_eye)
        } else {
            self
        }
    }

    /// True when the pair cannot produce a usable placement: non-finite
    /// coordinates or coincident eyes.
    pub fn is_degenerate(&self) -> bool {
        !self.left_eye.is_finite()
            || !self.right_eye.is_finite()
            || self.left_eye.distance(&self.right_eye) <= f32::EPSILON
    }
}

/// Overlay placement in container pixel space.
///
/// `x`/`y` is the overlay pivot (its center). The rendered overlay width is
/// `scale * reference_width_px`. Rotation is clockwise, in degrees, about
/// the pivot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementTransform {
    pub x: f32,
    pub y: f32,
    pub scale: f32,
    pub rotation_degrees: f32,
}

impl PlacementTransform {
    pub const fn new(x: f32, y: f32, scale: f32, rotation_degrees: f32) -> Self {
        Self {
            x,
            y,
            scale,
            rotation_degrees,
        }
    }

    /// Unit transform centered in the container.
    pub fn centered(container: ContainerSize) -> Self {
        let center = container.center();
        Self::new(center.x, center.y, 1.0, 0.0)
    }

    pub fn pivot(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Intermediate measurements of the eye line in container pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeMeasurement {
    pub left_px: Point,
    pub right_px: Point,
    pub pivot: Point,
    pub dx: f32,
    pub dy: f32,
    pub rotation_degrees: f32,
    pub eye_distance_px: f32,
}

impl EyeMeasurement {
    /// Pixels per millimeter for this face, assuming the given average IPD.
    pub fn pixels_per_mm(&self, average_ipd_mm: f32) -> f32 {
        self.eye_distance_px / average_ipd_mm
    }

    /// On-screen width (pixels) of a product `physical_width_mm` wide.
    pub fn target_width_px(&self, physical_width_mm: f32, average_ipd_mm: f32) -> f32 {
        physical_width_mm * self.pixels_per_mm(average_ipd_mm)
    }
}

/// Measures the eye line of `landmarks` inside `container`.
///
/// The pair is measured in image order, so the eye line always runs left to
/// right whatever labelling the detector used.
pub fn measure_eyes(landmarks: &LandmarkPair, container: ContainerSize) -> EyeMeasurement {
    let landmarks = landmarks.image_ordered();
    let left_px = container.denormalize(landmarks.left_eye);
    let right_px = container.denormalize(landmarks.right_eye);

    let dx = right_px.x - left_px.x;
    let dy = right_px.y - left_px.y;

    EyeMeasurement {
        left_px,
        right_px,
        pivot: left_px.midpoint(&right_px),
        dx,
        dy,
        rotation_degrees: dy.atan2(dx).to_degrees(),
        eye_distance_px: (dx * dx + dy * dy).sqrt(),
    }
}

/// Resolves the overlay placement for a pair of eye landmarks.
///
/// Pure function of its inputs. Returns `scale == 0` when both eyes map to
/// the same pixel; callers that cannot rule that out should use
/// [`try_resolve_placement`].
pub fn resolve_placement(
    landmarks: &LandmarkPair,
    container: ContainerSize,
    physical_width_mm: f32,
    reference_width_px: f32,
    average_ipd_mm: f32,
) -> PlacementTransform {
    let m = measure_eyes(landmarks, container);
    let target_width_px = m.target_width_px(physical_width_mm, average_ipd_mm);

    PlacementTransform {
        x: m.pivot.x,
        y: m.pivot.y,
        scale: target_width_px / reference_width_px,
        rotation_degrees: m.rotation_degrees,
    }
}

/// Like [`resolve_placement`], but returns `None` for degenerate geometry
/// (coincident or non-finite eyes, invalid container) instead of a
/// transform with a zero or non-finite scale.
pub fn try_resolve_placement(
    landmarks: &LandmarkPair,
    container: ContainerSize,
    physical_width_mm: f32,
    reference_width_px: f32,
    average_ipd_mm: f32,
) -> Option<PlacementTransform> {
    if landmarks.is_degenerate() || !container.is_valid() {
        return None;
    }
    if measure_eyes(landmarks, container).eye_distance_px < MIN_EYE_DISTANCE_PX {
        return None;
    }

    let transform = resolve_placement(
        landmarks,
        container,
        physical_width_mm,
        reference_width_px,
        average_ipd_mm,
    );
    (transform.scale.is_finite() && transform.scale > 0.0).then_some(transform)
}

/// Geometric hints for the generative fusion service.
///
/// These are placement suggestions, not pixel-exact instructions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionHints {
    /// Eye midpoint, normalized to the photo.
    pub center: Point,
    /// Eye line angle in degrees, measured in photo pixel space.
    pub rotation_degrees: f32,
}

impl Default for FusionHints {
    fn default() -> Self {
        Self {
            center: Point::new(0.5, 0.5),
            rotation_degrees: 0.0,
        }
    }
}

impl FusionHints {
    /// Derives hints from landmarks measured on a photo of the given size.
    ///
    /// Degenerate input yields the default (centered, level) hints.
    pub fn from_landmarks(landmarks: &LandmarkPair, photo: ContainerSize) -> Self {
        if landmarks.is_degenerate() || !photo.is_valid() {
            return Self::default();
        }
        let m = measure_eyes(landmarks, photo);
        Self {
            center: photo.normalize(m.pivot),
            rotation_degrees: m.rotation_degrees,
        }
    }

    /// Human-readable geometry line handed to the fusion service prompt.
    pub fn describe(&self) -> String {
        format!(
            "Center of glasses bridge at normalized X={:.2}, Y={:.2}. Rotate glasses by {:.1} degrees to align with eyes.",
            self.center.x, self.center.y, self.rotation_degrees
        )
    }
}
