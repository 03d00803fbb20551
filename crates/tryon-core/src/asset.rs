//! Overlay assets (eyewear frames) and the frame catalog.
//!
//! The catalog is read-only input supplied by the caller. Pixel data is
//! fetched through an [`AssetLoader`], which keeps the engine free of any
//! network or filesystem access.

use std::collections::HashMap;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Error type for overlay asset loading.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("Failed to decode overlay image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Overlay asset not found: {0}")]
    NotFound(String),
    #[error("Overlay asset '{id}' unavailable: {reason}")]
    Unavailable { id: String, reason: String },
    #[error("Overlay image has zero width or height")]
    EmptyImage,
}

/// Where the product image lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AssetSource {
    Url(String),
    Path(String),
}

/// Frame category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    #[default]
    Prescription,
    Sunglasses,
}

/// Target audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameGender {
    Male,
    Female,
    #[default]
    Unisex,
}

/// Frame silhouette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameShape {
    Round,
    Square,
    CatEye,
    Aviator,
    #[default]
    Rectangular,
}

/// A product image plus its physical dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayAsset {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub price: f32,
    pub image: AssetSource,
    /// Overall frame width in millimeters.
    #[serde(default)]
    pub width_mm: Option<f32>,
    #[serde(default)]
    pub lens_width_mm: Option<f32>,
    #[serde(default)]
    pub bridge_mm: Option<f32>,
    #[serde(default)]
    pub temple_mm: Option<f32>,
    #[serde(default)]
    pub kind: FrameKind,
    #[serde(default)]
    pub gender: FrameGender,
    #[serde(default)]
    pub shape: FrameShape,
    #[serde(default)]
    pub color: String,
    #[serde(default = "default_in_stock")]
    pub in_stock: bool,
}

fn default_in_stock() -> bool {
    true
}

impl OverlayAsset {
    /// Minimal asset with only an id, an image and a width.
    pub fn new(id: impl Into<String>, image: AssetSource, width_mm: Option<f32>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            brand: String::new(),
            price: 0.0,
            image,
            width_mm,
            lens_width_mm: None,
            bridge_mm: None,
            temple_mm: None,
            kind: FrameKind::default(),
            gender: FrameGender::default(),
            shape: FrameShape::default(),
            color: String::new(),
            in_stock: true,
        }
    }

    /// Physical width in millimeters, or `default_mm` when the asset does
    /// not declare a usable one.
    pub fn physical_width_mm(&self, default_mm: f32) -> f32 {
        match self.width_mm {
            Some(w) if w.is_finite() && w > 0.0 => w,
            _ => default_mm,
        }
    }
}

/// Ordered, read-only list of selectable frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameCatalog {
    pub frames: Vec<OverlayAsset>,
}

impl FrameCatalog {
    pub fn new(frames: Vec<OverlayAsset>) -> Self {
        Self { frames }
    }

    /// Loads a catalog from JSON. Accepts either `{ "frames": [...] }` or a
    /// bare array.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Wrapped { frames: Vec<OverlayAsset> },
            Bare(Vec<OverlayAsset>),
        }

        Ok(match serde_json::from_str::<Repr>(json)? {
            Repr::Wrapped { frames } | Repr::Bare(frames) => Self { frames },
        })
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn first(&self) -> Option<&OverlayAsset> {
        self.frames.first()
    }

    pub fn find(&self, id: &str) -> Option<&OverlayAsset> {
        self.frames.iter().find(|f| f.id == id)
    }

    /// Keeps `current` when it is still in the catalog, otherwise falls
    /// back to the first frame.
    pub fn reconcile_selection(&self, current: Option<&str>) -> Option<&OverlayAsset> {
        current
            .and_then(|id| self.find(id))
            .or_else(|| self.first())
    }
}

/// Capability that turns an [`OverlayAsset`] into decoded pixels.
pub trait AssetLoader {
    fn load(&self, asset: &OverlayAsset) -> Result<RgbaImage, AssetError>;
}

/// Decodes an encoded image (PNG, JPEG, WebP) into RGBA pixels.
pub fn decode_asset(bytes: &[u8]) -> Result<RgbaImage, AssetError> {
    let img = image::load_from_memory(bytes)?.to_rgba8();
    if img.width() == 0 || img.height() == 0 {
        return Err(AssetError::EmptyImage);
    }
    Ok(img)
}

/// Loader backed by encoded bytes held in memory, keyed by asset id.
#[derive(Debug, Default, Clone)]
pub struct MemoryAssetLoader {
    encoded: HashMap<String, Vec<u8>>,
}

impl MemoryAssetLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, bytes: Vec<u8>) {
        self.encoded.insert(id.into(), bytes);
    }
}

impl AssetLoader for MemoryAssetLoader {
    fn load(&self, asset: &OverlayAsset) -> Result<RgbaImage, AssetError> {
        let bytes = self
            .encoded
            .get(&asset.id)
            .ok_or_else(|| AssetError::NotFound(asset.id.clone()))?;
        decode_asset(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG_JSON: &str = r#"{
        "frames": [
            {
                "id": "aviator-gold",
                "name": "Aviator",
                "brand": "Ray",
                "price": 129.0,
                "image": { "type": "url", "value": "https://cdn.example.com/aviator.png" },
                "width_mm": 145.0,
                "lens_width_mm": 58.0,
                "bridge_mm": 14.0,
                "temple_mm": 140.0,
                "kind": "sunglasses",
                "gender": "unisex",
                "shape": "aviator",
                "color": "gold",
                "in_stock": true
            },
            {
                "id": "round-black",
                "image": { "type": "path", "value": "frames/round.png" },
                "shape": "cat_eye"
            }
        ]
    }"#;

    #[test]
    fn test_catalog_from_json() {
        let catalog = FrameCatalog::from_json(CATALOG_JSON).expect("Failed to parse catalog");
        assert_eq!(catalog.len(), 2);

        let aviator = catalog.find("aviator-gold").unwrap();
        assert_eq!(aviator.kind, FrameKind::Sunglasses);
        assert_eq!(aviator.shape, FrameShape::Aviator);
        assert_eq!(aviator.physical_width_mm(140.0), 145.0);

        let round = catalog.find("round-black").unwrap();
        assert_eq!(round.image, AssetSource::Path("frames/round.png".to_string()));
        assert_eq!(round.shape, FrameShape::CatEye);
        assert!(round.in_stock);
        assert_eq!(round.physical_width_mm(140.0), 140.0);
    }

    #[test]
    fn test_catalog_bare_array() {
        let json = r#"[{ "id": "a", "image": { "type": "path", "value": "a.png" } }]"#;
        let catalog = FrameCatalog::from_json(json).expect("Failed to parse catalog");
        assert_eq!(catalog.first().map(|f| f.id.as_str()), Some("a"));
    }

    #[test]
    fn test_non_positive_width_falls_back() {
        let asset = OverlayAsset::new("x", AssetSource::Path("x.png".into()), Some(0.0));
        assert_eq!(asset.physical_width_mm(140.0), 140.0);
    }

    #[test]
    fn test_reconcile_selection() {
        let catalog = FrameCatalog::from_json(CATALOG_JSON).unwrap();
        assert_eq!(
            catalog.reconcile_selection(Some("round-black")).unwrap().id,
            "round-black"
        );
        assert_eq!(
            catalog.reconcile_selection(Some("deleted")).unwrap().id,
            "aviator-gold"
        );
        assert_eq!(catalog.reconcile_selection(None).unwrap().id, "aviator-gold");
        assert!(FrameCatalog::default().reconcile_selection(Some("a")).is_none());
    }

    #[test]
    fn test_memory_loader() {
        let mut encoded = Vec::new();
        let img = RgbaImage::from_pixel(3, 2, image::Rgba([1, 2, 3, 255]));
        img.write_to(&mut std::io::Cursor::new(&mut encoded), image::ImageFormat::Png)
            .unwrap();

        let mut loader = MemoryAssetLoader::new();
        loader.insert("frame", encoded);

        let asset = OverlayAsset::new("frame", AssetSource::Path("frame.png".into()), None);
        let decoded = loader.load(&asset).expect("Failed to load");
        assert_eq!(decoded.dimensions(), (3, 2));

        let missing = OverlayAsset::new("other", AssetSource::Path("o.png".into()), None);
        assert!(matches!(loader.load(&missing), Err(AssetError::NotFound(_))));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(
            decode_asset(b"definitely not an image"),
            Err(AssetError::Decode(_))
        ));
    }
}
