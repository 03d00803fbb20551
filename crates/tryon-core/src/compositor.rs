//! Compositor: live preview description and export flattening.
//!
//! Drawing goes through the [`RasterSurface`] capability so the export path
//! can be backed by any 2D surface. [`ImageSurface`] is the in-memory
//! implementation on top of `image::RgbaImage`.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use glam::{Affine2, Vec2};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage, imageops};
use serde::{Deserialize, Serialize};

use crate::asset::AssetError;
use crate::blend::{BlendMode, BlendParameters};
use crate::geometry::{ContainerSize, PlacementTransform};

/// Error type for export flattening.
#[derive(Debug, thiserror::Error)]
pub enum CompositeError {
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),
    #[error("No overlay asset selected")]
    NoAssetSelected,
    #[error("Failed to encode flattened image: {0}")]
    Encode(#[from] image::ImageError),
}

/// Output encoding for the flattened image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Png,
    Jpeg {
        quality: u8,
    },
}

impl ExportFormat {
    /// Picks a format from a file extension (`png`, `jpg`, `jpeg`).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg { quality: 92 }),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg { .. } => "jpg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg { .. } => "image/jpeg",
        }
    }
}

/// Inverse of an overlay frame, or `None` when it collapses an axis.
fn invert(matrix: &Affine2) -> Option<Affine2> {
    let det = matrix.matrix2.determinant();
    if !det.is_finite() || det.abs() <= f32::EPSILON * f32::EPSILON {
        return None;
    }
    Some(matrix.inverse())
}

/// One overlay draw call: the image, the frame it is drawn in, and the
/// rectangle it occupies (centered on the frame origin).
#[derive(Debug, Clone, Copy)]
pub struct OverlayDraw<'a> {
    pub image: &'a RgbaImage,
    pub matrix: Affine2,
    pub width: f32,
    pub height: f32,
    pub blend: BlendParameters,
    pub mode: BlendMode,
}

/// A 2D drawing surface the compositor can flatten onto.
pub trait RasterSurface {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Draws the base photo covering the whole surface.
    fn draw_base(&mut self, photo: &RgbaImage);
    /// Draws a filtered overlay inside a transformed frame.
    fn draw_overlay(&mut self, draw: &OverlayDraw<'_>);
    /// Encodes the surface contents.
    fn encode(&self, format: ExportFormat) -> Result<Vec<u8>, CompositeError>;
}

/// In-memory RGBA surface.
#[derive(Debug, Clone)]
pub struct ImageSurface {
    canvas: RgbaImage,
}

impl ImageSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbaImage::new(width, height),
        }
    }

    pub fn into_image(self) -> RgbaImage {
        self.canvas
    }
}

impl RasterSurface for ImageSurface {
    fn width(&self) -> u32 {
        self.canvas.width()
    }

    fn height(&self) -> u32 {
        self.canvas.height()
    }

    fn draw_base(&mut self, photo: &RgbaImage) {
        if photo.dimensions() == self.canvas.dimensions() {
            self.canvas.clone_from(photo);
        } else {
            self.canvas = imageops::resize(
                photo,
                self.canvas.width(),
                self.canvas.height(),
                imageops::FilterType::Triangle,
            );
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn draw_overlay(&mut self, draw: &OverlayDraw<'_>) {
        let Some(inverse) = invert(&draw.matrix) else {
            tracing::warn!("[compositor] overlay matrix is not invertible, skipping");
            return;
        };
        if draw.width <= 0.0 || draw.height <= 0.0 {
            return;
        }

        let mut filtered = draw.image.clone();
        draw.blend.apply_image(&mut filtered);

        let half_w = draw.width / 2.0;
        let half_h = draw.height / 2.0;
        let corners = [
            Vec2::new(-half_w, -half_h),
            Vec2::new(half_w, -half_h),
            Vec2::new(half_w, half_h),
            Vec2::new(-half_w, half_h),
        ]
        .map(|p| draw.matrix.transform_point2(p));

        let (min_x, max_x) = corners
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), p| (lo.min(p.x), hi.max(p.x)));
        let (min_y, max_y) = corners
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), p| (lo.min(p.y), hi.max(p.y)));

        let canvas_w = self.canvas.width() as f32;
        let canvas_h = self.canvas.height() as f32;
        let x0 = min_x.floor().clamp(0.0, canvas_w) as u32;
        let x1 = max_x.ceil().clamp(0.0, canvas_w) as u32;
        let y0 = min_y.floor().clamp(0.0, canvas_h) as u32;
        let y1 = max_y.ceil().clamp(0.0, canvas_h) as u32;

        let tex_w = filtered.width() as f32;
        let tex_h = filtered.height() as f32;

        for py in y0..y1 {
            for px in x0..x1 {
                let local = inverse.transform_point2(Vec2::new(px as f32 + 0.5, py as f32 + 0.5));
                if local.x < -half_w || local.x >= half_w || local.y < -half_h || local.y >= half_h
                {
                    continue;
                }
                let sx = (local.x + half_w) * tex_w / draw.width;
                let sy = (local.y + half_h) * tex_h / draw.height;
                let sample = sample_bilinear(&filtered, sx, sy);

                let dst = *self.canvas.get_pixel(px, py);
                self.canvas
                    .put_pixel(px, py, draw.mode.composite(dst, sample));
            }
        }
    }

    fn encode(&self, format: ExportFormat) -> Result<Vec<u8>, CompositeError> {
        let mut bytes = Vec::new();
        match format {
            ExportFormat::Png => {
                self.canvas
                    .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
            }
            ExportFormat::Jpeg { quality } => {
                let rgb = DynamicImage::ImageRgba8(self.canvas.clone()).to_rgb8();
                JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
                    .encode_image(&rgb)?;
            }
        }
        Ok(bytes)
    }
}

/// Samples `img` at texel-space coordinates with bilinear filtering.
/// Texel centers sit at `i + 0.5`; edges are clamped.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn sample_bilinear(img: &RgbaImage, sx: f32, sy: f32) -> Rgba<u8> {
    let max_x = img.width().saturating_sub(1);
    let max_y = img.height().saturating_sub(1);

    let fx = (sx - 0.5).clamp(0.0, max_x as f32);
    let fy = (sy - 0.5).clamp(0.0, max_y as f32);
    let x0 = fx.floor() as u32;
    let y0 = fy.floor() as u32;
    let x1 = (x0 + 1).min(max_x);
    let y1 = (y0 + 1).min(max_y);
    let tx = fx - x0 as f32;
    let ty = fy - y0 as f32;

    let p00 = img.get_pixel(x0, y0).0;
    let p10 = img.get_pixel(x1, y0).0;
    let p01 = img.get_pixel(x0, y1).0;
    let p11 = img.get_pixel(x1, y1).0;

    let mut out = [0u8; 4];
    for i in 0..4 {
        let top = f32::from(p00[i]) * (1.0 - tx) + f32::from(p10[i]) * tx;
        let bottom = f32::from(p01[i]) * (1.0 - tx) + f32::from(p11[i]) * tx;
        out[i] = (top * (1.0 - ty) + bottom * ty).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

/// Overlay to place on top of the base photo.
#[derive(Debug, Clone, Copy)]
pub struct OverlayLayer<'a> {
    pub image: &'a RgbaImage,
    pub transform: PlacementTransform,
    pub blend: BlendParameters,
    pub mode: BlendMode,
}

/// Encoded result of an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenedImage {
    pub width: u32,
    pub height: u32,
    pub format: ExportFormat,
    pub bytes: Vec<u8>,
}

/// Description of the live preview overlay layer, positioned in display
/// (container) coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewLayer {
    /// Pivot position; the layer is centered on it.
    pub left: f32,
    pub top: f32,
    /// Unscaled layer width (the reference width).
    pub width: f32,
    pub scale: f32,
    pub rotation_degrees: f32,
    pub css_transform: String,
    pub css_filter: String,
    pub mix_blend_mode: String,
}

/// Renders the overlay for preview and export.
#[derive(Debug, Clone, Copy)]
pub struct Compositor {
    reference_width_px: f32,
}

impl Compositor {
    pub fn new(reference_width_px: f32) -> Self {
        Self { reference_width_px }
    }

    /// Live preview layer. No resampling, display coordinates are used as-is.
    pub fn preview(
        &self,
        transform: &PlacementTransform,
        blend: &BlendParameters,
        mode: BlendMode,
    ) -> PreviewLayer {
        PreviewLayer {
            left: transform.x,
            top: transform.y,
            width: self.reference_width_px,
            scale: transform.scale,
            rotation_degrees: transform.rotation_degrees,
            css_transform: format!(
                "translate(-50%, -50%) scale({}) rotate({}deg)",
                transform.scale, transform.rotation_degrees
            ),
            css_filter: blend.css_filter(),
            mix_blend_mode: mode.css_value().to_string(),
        }
    }

    /// Frame in which the overlay is drawn at native resolution.
    ///
    /// The pivot is mapped with independent X/Y factors and the overlay is
    /// scaled by `(scale * sx, scale * sy)`.
    #[allow(clippy::cast_precision_loss)]
    pub fn overlay_matrix(
        native_width: u32,
        native_height: u32,
        display: ContainerSize,
        transform: &PlacementTransform,
    ) -> Result<Affine2, CompositeError> {
        if native_width == 0 || native_height == 0 {
            return Err(CompositeError::InvalidDimensions(format!(
                "native size {native_width}x{native_height}"
            )));
        }
        if !display.is_valid() {
            return Err(CompositeError::InvalidDimensions(format!(
                "display size {}x{}",
                display.width, display.height
            )));
        }

        let sx = native_width as f32 / display.width;
        let sy = native_height as f32 / display.height;

        Ok(Affine2::from_translation(Vec2::new(transform.x * sx, transform.y * sy))
            * Affine2::from_angle(transform.rotation_degrees.to_radians())
            * Affine2::from_scale(Vec2::new(transform.scale * sx, transform.scale * sy)))
    }

    /// Overlay rectangle `(width, height)` in overlay-local units: the
    /// reference width, with height following the image aspect ratio.
    #[allow(clippy::cast_precision_loss)]
    pub fn overlay_size(&self, overlay: &RgbaImage) -> (f32, f32) {
        let w = self.reference_width_px;
        let h = w * overlay.height() as f32 / overlay.width().max(1) as f32;
        (w, h)
    }

    /// Draws base photo and overlay onto `surface` at its resolution.
    pub fn render<S: RasterSurface>(
        &self,
        surface: &mut S,
        base: &RgbaImage,
        display: ContainerSize,
        overlay: Option<&OverlayLayer<'_>>,
    ) -> Result<(), CompositeError> {
        surface.draw_base(base);

        let Some(layer) = overlay else {
            return Ok(());
        };
        if layer.image.width() == 0 || layer.image.height() == 0 {
            return Err(AssetError::EmptyImage.into());
        }

        let matrix =
            Self::overlay_matrix(surface.width(), surface.height(), display, &layer.transform)?;
        let (width, height) = self.overlay_size(layer.image);
        surface.draw_overlay(&OverlayDraw {
            image: layer.image,
            matrix,
            width,
            height,
            blend: layer.blend,
            mode: layer.mode,
        });
        Ok(())
    }

    /// Flattens base photo and overlay at the photo's native resolution
    /// and encodes the result.
    pub fn flatten(
        &self,
        base: &RgbaImage,
        display: ContainerSize,
        overlay: Option<&OverlayLayer<'_>>,
        format: ExportFormat,
    ) -> Result<FlattenedImage, CompositeError> {
        let (width, height) = base.dimensions();
        if width == 0 || height == 0 {
            return Err(CompositeError::InvalidDimensions(format!(
                "base photo {width}x{height}"
            )));
        }

        let mut surface = ImageSurface::new(width, height);
        self.render(&mut surface, base, display, overlay)?;
        let bytes = surface.encode(format)?;

        tracing::info!(
            "[compositor] flattened {}x{} {} ({} bytes)",
            width,
            height,
            format.extension(),
            bytes.len()
        );

        Ok(FlattenedImage {
            width,
            height,
            format,
            bytes,
        })
    }
}
