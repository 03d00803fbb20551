//! Overlay blend parameters and the per-pixel filter.

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// Brightness and contrast multipliers in percent (100 = unchanged).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendParameters {
    pub brightness: f32,
    pub contrast: f32,
}

impl Default for BlendParameters {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl BlendParameters {
    /// No-op filter.
    pub const IDENTITY: Self = Self {
        brightness: 100.0,
        contrast: 100.0,
    };

    pub const fn new(brightness: f32, contrast: f32) -> Self {
        Self {
            brightness,
            contrast,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// CSS filter string for the live preview layer.
    pub fn css_filter(&self) -> String {
        format!("contrast({}%) brightness({}%)", self.contrast, self.brightness)
    }

    /// Applies contrast then brightness to one normalized channel value.
    pub fn apply_channel(&self, c: f32) -> f32 {
        let contrasted = ((c - 0.5) * (self.contrast / 100.0) + 0.5).clamp(0.0, 1.0);
        (contrasted * (self.brightness / 100.0)).clamp(0.0, 1.0)
    }

    /// Applies the filter to one pixel. Alpha is left untouched.
    pub fn apply_pixel(&self, px: Rgba<u8>) -> Rgba<u8> {
        let [r, g, b, a] = px.0;
        Rgba([
            self.filter_u8(r),
            self.filter_u8(g),
            self.filter_u8(b),
            a,
        ])
    }

    /// Applies the filter to every pixel of `img`.
    pub fn apply_image(&self, img: &mut RgbaImage) {
        if self.is_identity() {
            return;
        }
        for px in img.pixels_mut() {
            *px = self.apply_pixel(*px);
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn filter_u8(&self, c: u8) -> u8 {
        (self.apply_channel(f32::from(c) / 255.0) * 255.0).round() as u8
    }
}

/// How overlay pixels combine with the photo underneath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    /// Darken-only multiply. White overlay pixels leave the photo unchanged,
    /// which hides the white background of opaque product shots.
    Multiply,
    /// Standard source-over alpha compositing.
    Alpha,
}

impl BlendMode {
    /// `Alpha` when the overlay carries any transparency, `Multiply` for
    /// fully opaque assets.
    pub fn detect(overlay: &RgbaImage) -> Self {
        if overlay.pixels().any(|p| p.0[3] < u8::MAX) {
            Self::Alpha
        } else {
            Self::Multiply
        }
    }

    /// CSS `mix-blend-mode` value for the live preview.
    pub fn css_value(&self) -> &'static str {
        match self {
            Self::Multiply => "multiply",
            Self::Alpha => "normal",
        }
    }

    /// Composites `src` over `dst`, weighted by the source alpha.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn composite(&self, dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
        let alpha = f32::from(src.0[3]) / 255.0;
        if alpha <= 0.0 {
            return dst;
        }

        let mut out = [0u8; 4];
        for i in 0..3 {
            let d = f32::from(dst.0[i]) / 255.0;
            let s = f32::from(src.0[i]) / 255.0;
            let blended = match self {
                Self::Multiply => d * s,
                Self::Alpha => s,
            };
            let v = d + (blended - d) * alpha;
            out[i] = (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        }

        let da = f32::from(dst.0[3]) / 255.0;
        let out_alpha = alpha + da * (1.0 - alpha);
        out[3] = (out_alpha.clamp(0.0, 1.0) * 255.0).round() as u8;
        Rgba(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_noop() {
        let blend = BlendParameters::IDENTITY;
        for c in [0u8, 1, 64, 127, 128, 200, 255] {
            let px = Rgba([c, c, c, 42]);
            assert_eq!(blend.apply_pixel(px), px);
        }
    }

    #[test]
    fn test_css_filter_string() {
        let blend = BlendParameters::new(105.0, 110.0);
        assert_eq!(blend.css_filter(), "contrast(110%) brightness(105%)");
    }

    #[test]
    fn test_brightness_scales_channels() {
        let blend = BlendParameters::new(50.0, 100.0);
        assert_eq!(blend.apply_pixel(Rgba([200, 100, 0, 255])), Rgba([100, 50, 0, 255]));
    }

    #[test]
    fn test_contrast_pivots_on_mid_gray() {
        let blend = BlendParameters::new(100.0, 200.0);
        let mid = blend.apply_channel(0.5);
        assert!((mid - 0.5).abs() < 1e-6);
        assert!((blend.apply_channel(0.75) - 1.0).abs() < 1e-6);
        assert!((blend.apply_channel(0.25) - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_contrast_applied_before_brightness() {
        // contrast 200% pushes 0.75 to 1.0, then brightness 50% halves it.
        let blend = BlendParameters::new(50.0, 200.0);
        assert!((blend.apply_channel(0.75) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_detect_blend_mode() {
        let opaque = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]));
        assert_eq!(BlendMode::detect(&opaque), BlendMode::Multiply);

        let mut cutout = opaque.clone();
        cutout.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        assert_eq!(BlendMode::detect(&cutout), BlendMode::Alpha);
    }

    #[test]
    fn test_multiply_white_is_transparent() {
        let dst = Rgba([120, 80, 40, 255]);
        let white = Rgba([255, 255, 255, 255]);
        assert_eq!(BlendMode::Multiply.composite(dst, white), dst);

        let black = Rgba([0, 0, 0, 255]);
        assert_eq!(BlendMode::Multiply.composite(dst, black), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_alpha_source_over() {
        let dst = Rgba([0, 0, 0, 255]);
        let src = Rgba([255, 255, 255, 255]);
        assert_eq!(BlendMode::Alpha.composite(dst, src), src);
        assert_eq!(BlendMode::Alpha.composite(dst, Rgba([255, 255, 255, 0])), dst);

        let half = BlendMode::Alpha.composite(dst, Rgba([255, 255, 255, 128]));
        assert!((i32::from(half.0[0]) - 128).abs() <= 1);
        assert_eq!(half.0[3], 255);
    }
}
