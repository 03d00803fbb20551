//! Engine configuration.
//!
//! Every constant the engine depends on (reference overlay width, the
//! anthropometric calibration distance, slider ranges, detector input size)
//! lives here and is handed to the session at construction.

use serde::{Deserialize, Serialize};

use crate::blend::BlendParameters;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Engine-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Overlay width in pixels at `scale = 1`.
    pub reference_width_px: f32,
    /// Population average interpupillary distance in millimeters.
    pub average_ipd_mm: f32,
    /// Physical frame width used when an asset does not declare one.
    pub default_frame_width_mm: f32,
    /// Scale slider range `[min, max]`.
    pub scale_range: [f32; 2],
    /// Rotation slider range in degrees `[min, max]`.
    pub rotation_range: [f32; 2],
    /// Brightness / contrast slider range in percent `[min, max]`.
    pub blend_range: [f32; 2],
    /// Blend applied on session start and on reset.
    pub default_blend: BlendParameters,
    /// Longest side (pixels) of the image sent to the landmark detector.
    pub detection_max_dimension: u32,
    /// JPEG quality of the image sent to the landmark detector.
    pub detection_jpeg_quality: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reference_width_px: 300.0,
            average_ipd_mm: 63.0,
            default_frame_width_mm: 140.0,
            scale_range: [0.5, 2.5],
            rotation_range: [-45.0, 45.0],
            blend_range: [50.0, 150.0],
            default_blend: BlendParameters::new(105.0, 110.0),
            detection_max_dimension: 600,
            detection_jpeg_quality: 70,
        }
    }
}

impl EngineConfig {
    /// Loads a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the config to pretty JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks that every value is usable by the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("reference_width_px", self.reference_width_px)?;
        positive("average_ipd_mm", self.average_ipd_mm)?;
        positive("default_frame_width_mm", self.default_frame_width_mm)?;
        ordered("scale_range", self.scale_range)?;
        positive("scale_range", self.scale_range[0])?;
        ordered("rotation_range", self.rotation_range)?;
        ordered("blend_range", self.blend_range)?;
        positive("default_blend.brightness", self.default_blend.brightness)?;
        positive("default_blend.contrast", self.default_blend.contrast)?;

        if self.detection_max_dimension == 0 {
            return Err(ConfigError::Invalid {
                field: "detection_max_dimension",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !(1..=100).contains(&self.detection_jpeg_quality) {
            return Err(ConfigError::Invalid {
                field: "detection_jpeg_quality",
                reason: format!("{} is outside 1..=100", self.detection_jpeg_quality),
            });
        }
        Ok(())
    }

    /// Clamps a scale value to the slider range.
    pub fn clamp_scale(&self, value: f32) -> f32 {
        value.clamp(self.scale_range[0], self.scale_range[1])
    }

    /// Clamps a rotation value (degrees) to the slider range.
    pub fn clamp_rotation(&self, value: f32) -> f32 {
        value.clamp(self.rotation_range[0], self.rotation_range[1])
    }

    /// Clamps a brightness or contrast percentage to the slider range.
    pub fn clamp_blend(&self, value: f32) -> f32 {
        value.clamp(self.blend_range[0], self.blend_range[1])
    }
}

fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("{value} is not a positive number"),
        })
    }
}

fn ordered(field: &'static str, range: [f32; 2]) -> Result<(), ConfigError> {
    if range[0].is_finite() && range[1].is_finite() && range[0] <= range[1] {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("[{}, {}] is not an ordered range", range[0], range[1]),
        })
    }
}
