//! Try-On Core Library
//!
//! Aligns an eyewear frame image to a face photo from two eye landmarks,
//! lets the user adjust the placement, and flattens the result at the
//! photo's native resolution.
//!
//! The engine never touches the network or filesystem: landmarks arrive
//! through [`OverlaySession::complete_detection`] and pixels through an
//! [`AssetLoader`].

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod asset;
pub mod blend;
pub mod compositor;
pub mod config;
pub mod detection;
pub mod geometry;
pub mod manipulation;
pub mod session;
pub mod store;

pub use asset::{AssetError, AssetLoader, AssetSource, FrameCatalog, MemoryAssetLoader, OverlayAsset};
pub use blend::{BlendMode, BlendParameters};
pub use compositor::{CompositeError, Compositor, ExportFormat, FlattenedImage, PreviewLayer};
pub use config::{ConfigError, EngineConfig};
pub use detection::{
    DetectionError, DetectionOutcome, DetectionTicket, PhotoId, parse_detector_response,
    prepare_detection_input,
};
pub use geometry::{
    ContainerSize, FusionHints, LandmarkPair, PlacementTransform, Point, resolve_placement,
    try_resolve_placement,
};
pub use manipulation::{DragState, Manipulator, PointerEvent};
pub use session::{AlignTrigger, LandmarkState, OverlaySession};
pub use store::SessionStore;
