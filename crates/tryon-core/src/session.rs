//! Overlay session: decides when auto-alignment may overwrite the
//! transform, owns the per-photo landmark cache, and feeds the compositor.
//!
//! Auto-alignment runs on three triggers only: a photo's landmarks becoming
//! available, a change of the selected asset, and an explicit reset. Manual
//! edits clear `auto_align_enabled` and stay in place until one of those
//! triggers recurs.

use image::RgbaImage;

use crate::asset::{AssetLoader, OverlayAsset};
use crate::blend::{BlendMode, BlendParameters};
use crate::compositor::{
    CompositeError, Compositor, ExportFormat, FlattenedImage, OverlayLayer, PreviewLayer,
};
use crate::config::EngineConfig;
use crate::detection::{DetectionOutcome, DetectionTicket, PhotoId};
use crate::geometry::{ContainerSize, FusionHints, LandmarkPair, PlacementTransform, try_resolve_placement};
use crate::manipulation::{Manipulator, PointerEvent};

/// Why the last auto-alignment was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignTrigger {
    PhotoLoaded,
    AssetChanged,
    Reset,
}

/// Landmark cache state for the current photo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LandmarkState {
    /// No detection issued for this photo yet.
    Unrequested,
    /// Detection in flight.
    Pending(DetectionTicket),
    /// Landmarks available.
    Ready(LandmarkPair),
    /// Detector found nothing usable; not retried automatically.
    Failed,
}

#[derive(Debug, Clone)]
struct PhotoState {
    id: PhotoId,
    landmarks: LandmarkState,
}

/// One interactive try-on session.
#[derive(Debug, Clone)]
pub struct OverlaySession {
    config: EngineConfig,
    compositor: Compositor,
    container: ContainerSize,
    manipulator: Manipulator,
    blend: BlendParameters,
    asset: Option<OverlayAsset>,
    photo: Option<PhotoState>,
    overlay_visible: bool,
    auto_align_enabled: bool,
    last_trigger: Option<AlignTrigger>,
    next_request: u64,
}

impl OverlaySession {
    pub fn new(config: EngineConfig, container: ContainerSize) -> Self {
        Self {
            compositor: Compositor::new(config.reference_width_px),
            manipulator: Manipulator::new(PlacementTransform::centered(container)),
            blend: config.default_blend,
            config,
            container,
            asset: None,
            photo: None,
            overlay_visible: true,
            auto_align_enabled: true,
            last_trigger: None,
            next_request: 0,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn container(&self) -> ContainerSize {
        self.container
    }

    pub fn transform(&self) -> PlacementTransform {
        self.manipulator.transform()
    }

    pub fn manipulator(&self) -> &Manipulator {
        &self.manipulator
    }

    pub fn blend(&self) -> BlendParameters {
        self.blend
    }

    pub fn selected_asset(&self) -> Option<&OverlayAsset> {
        self.asset.as_ref()
    }

    pub fn photo_id(&self) -> Option<PhotoId> {
        self.photo.as_ref().map(|p| p.id)
    }

    pub fn landmark_state(&self) -> Option<LandmarkState> {
        self.photo.as_ref().map(|p| p.landmarks)
    }

    pub fn landmarks(&self) -> Option<LandmarkPair> {
        match self.landmark_state()? {
            LandmarkState::Ready(pair) => Some(pair),
            _ => None,
        }
    }

    /// True while a detection request for the current photo is in flight.
    pub fn is_pending(&self) -> bool {
        matches!(self.landmark_state(), Some(LandmarkState::Pending(_)))
    }

    pub fn overlay_visible(&self) -> bool {
        self.overlay_visible
    }

    pub fn auto_align_enabled(&self) -> bool {
        self.auto_align_enabled
    }

    pub fn last_trigger(&self) -> Option<AlignTrigger> {
        self.last_trigger
    }

    // ------------------------------------------------------------------
    // Photo and detection lifecycle
    // ------------------------------------------------------------------

    /// Makes `id` the current photo.
    ///
    /// A different photo drops the landmark cache, invalidates any request
    /// in flight, recenters the overlay and arms auto-alignment. Returns the
    /// ticket of the detection request the caller must issue, if any.
    /// Reloading the current photo reuses its cache.
    pub fn load_photo(&mut self, id: PhotoId) -> Option<DetectionTicket> {
        if self.photo_id() == Some(id) {
            return self.ensure_detection();
        }

        tracing::info!("[session] photo loaded: {id}");
        self.photo = Some(PhotoState {
            id,
            landmarks: LandmarkState::Unrequested,
        });
        self.manipulator
            .reset(self.container.width, self.container.height);
        self.overlay_visible = true;
        self.arm(AlignTrigger::PhotoLoaded);
        self.ensure_detection()
    }

    /// Issues a detection request for the current photo, even after an
    /// earlier failure. Supersedes any request in flight.
    pub fn request_detection(&mut self) -> Option<DetectionTicket> {
        let request = self.next_request;
        let photo = self.photo.as_mut()?;
        let ticket = DetectionTicket {
            photo: photo.id,
            request,
        };
        photo.landmarks = LandmarkState::Pending(ticket);
        self.next_request += 1;
        tracing::debug!("[session] detection requested: {ticket:?}");
        Some(ticket)
    }

    /// Issues a request only when the current photo has never been sent.
    fn ensure_detection(&mut self) -> Option<DetectionTicket> {
        match self.landmark_state()? {
            LandmarkState::Unrequested => self.request_detection(),
            _ => None,
        }
    }

    /// Applies a detector completion. Results for a photo or request that
    /// is no longer current are discarded.
    pub fn complete_detection(
        &mut self,
        ticket: DetectionTicket,
        result: Option<LandmarkPair>,
    ) -> DetectionOutcome {
        let Some(photo) = self.photo.as_mut() else {
            return DetectionOutcome::Stale;
        };
        if photo.landmarks != LandmarkState::Pending(ticket) {
            tracing::debug!("[session] discarding stale detection result {ticket:?}");
            return DetectionOutcome::Stale;
        }

        let Some(pair) = result else {
            tracing::warn!("[session] detector returned no landmarks, keeping current transform");
            photo.landmarks = LandmarkState::Failed;
            return DetectionOutcome::NoLandmarks;
        };
        if pair.is_degenerate() {
            tracing::warn!("[session] degenerate landmarks {pair:?}, treating as no face");
            photo.landmarks = LandmarkState::Failed;
            return DetectionOutcome::Degenerate;
        }

        photo.landmarks = LandmarkState::Ready(pair);
        if self.auto_align_enabled && self.auto_align() {
            DetectionOutcome::Aligned(pair)
        } else {
            DetectionOutcome::Cached(pair)
        }
    }

    /// Marks a request as failed (network error, timeout). Same effect as a
    /// completion without landmarks.
    pub fn fail_detection(&mut self, ticket: DetectionTicket) -> DetectionOutcome {
        self.complete_detection(ticket, None)
    }

    // ------------------------------------------------------------------
    // Alignment triggers
    // ------------------------------------------------------------------

    /// Selects a new overlay asset and re-aligns from cached landmarks.
    ///
    /// Returns a detection ticket when the current photo has not been sent
    /// to the detector yet.
    pub fn select_asset(&mut self, asset: OverlayAsset) -> Option<DetectionTicket> {
        tracing::info!("[session] asset selected: {}", asset.id);
        self.asset = Some(asset);
        self.overlay_visible = true;
        self.arm(AlignTrigger::AssetChanged);
        self.auto_align();
        self.ensure_detection()
    }

    /// Explicit reset: recenters the overlay, restores the default blend,
    /// then re-aligns from cached landmarks.
    pub fn reset_all(&mut self) {
        self.manipulator
            .reset(self.container.width, self.container.height);
        self.blend = self.config.default_blend;
        self.arm(AlignTrigger::Reset);
        self.auto_align();
    }

    fn arm(&mut self, trigger: AlignTrigger) {
        self.auto_align_enabled = true;
        self.last_trigger = Some(trigger);
    }

    /// Overwrites the transform from cached landmarks when possible.
    fn auto_align(&mut self) -> bool {
        if !self.overlay_visible {
            return false;
        }
        let (Some(pair), Some(asset)) = (self.landmarks(), self.asset.as_ref()) else {
            return false;
        };

        let width_mm = asset.physical_width_mm(self.config.default_frame_width_mm);
        let Some(transform) = try_resolve_placement(
            &pair,
            self.container,
            width_mm,
            self.config.reference_width_px,
            self.config.average_ipd_mm,
        ) else {
            tracing::warn!("[session] cannot resolve placement for {pair:?} in {:?}", self.container);
            return false;
        };

        self.manipulator.set_transform(transform);
        tracing::info!(
            "[session] auto-aligned ({:?}): x={:.1} y={:.1} scale={:.3} rotation={:.1}",
            self.last_trigger,
            transform.x,
            transform.y,
            transform.scale,
            transform.rotation_degrees
        );
        true
    }

    // ------------------------------------------------------------------
    // User interaction
    // ------------------------------------------------------------------

    fn mark_manual_edit(&mut self) {
        self.auto_align_enabled = false;
    }

    /// Routes pointer input to the manipulator. Ignored while the overlay
    /// is hidden.
    pub fn handle_pointer(&mut self, event: &PointerEvent) -> bool {
        if !self.overlay_visible {
            return false;
        }
        let changed = self.manipulator.handle_pointer(event);
        if changed {
            self.mark_manual_edit();
        }
        changed
    }

    pub fn begin_drag(&mut self, pointer_x: f32, pointer_y: f32) {
        if self.overlay_visible {
            self.manipulator.begin_drag(pointer_x, pointer_y);
        }
    }

    pub fn update_drag(&mut self, pointer_x: f32, pointer_y: f32) -> bool {
        let changed = self.manipulator.update_drag(pointer_x, pointer_y);
        if changed {
            self.mark_manual_edit();
        }
        changed
    }

    pub fn end_drag(&mut self) {
        self.manipulator.end_drag();
    }

    pub fn set_scale(&mut self, value: f32) -> bool {
        let accepted = self.manipulator.set_scale(value);
        if accepted {
            self.mark_manual_edit();
        }
        accepted
    }

    pub fn set_rotation(&mut self, value: f32) -> bool {
        let accepted = self.manipulator.set_rotation(value);
        if accepted {
            self.mark_manual_edit();
        }
        accepted
    }

    /// Sets brightness / contrast. Independent of the transform and of
    /// auto-alignment.
    pub fn set_blend(&mut self, blend: BlendParameters) -> bool {
        let valid = |v: f32| v.is_finite() && v >= 0.0;
        if !(valid(blend.brightness) && valid(blend.contrast)) {
            tracing::warn!("[session] rejected blend {blend:?}");
            return false;
        }
        self.blend = blend;
        true
    }

    /// Records a new display size. Does not re-align.
    pub fn set_container(&mut self, container: ContainerSize) -> bool {
        if !container.is_valid() {
            tracing::warn!("[session] rejected container {container:?}");
            return false;
        }
        self.container = container;
        true
    }

    // ------------------------------------------------------------------
    // Generative fusion path
    // ------------------------------------------------------------------

    /// Geometric hints for the fusion service, measured on a photo of the
    /// given size. Falls back to centered, level hints without landmarks.
    pub fn fusion_request(&self, photo_size: ContainerSize) -> FusionHints {
        self.landmarks()
            .map(|pair| FusionHints::from_landmarks(&pair, photo_size))
            .unwrap_or_default()
    }

    /// Replaces the base photo with the fused result. The overlay is baked
    /// into that photo, so the interactive layer is hidden.
    pub fn apply_fusion_result(&mut self, fused: PhotoId) {
        tracing::info!("[session] fusion result applied: {fused}");
        self.photo = Some(PhotoState {
            id: fused,
            landmarks: LandmarkState::Unrequested,
        });
        self.manipulator.end_drag();
        self.overlay_visible = false;
    }

    /// Shows the interactive overlay again and re-enters alignment.
    pub fn show_overlay(&mut self) -> Option<DetectionTicket> {
        if self.overlay_visible {
            return None;
        }
        self.overlay_visible = true;
        self.arm(AlignTrigger::PhotoLoaded);
        self.auto_align();
        self.ensure_detection()
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// Live preview layer. `overlay` is the decoded asset when available;
    /// without it the layer is still positioned (placeholder rendering).
    pub fn preview(&self, overlay: Option<&RgbaImage>) -> Option<PreviewLayer> {
        if !self.overlay_visible || self.asset.is_none() {
            return None;
        }
        let mode = overlay.map_or(BlendMode::Multiply, BlendMode::detect);
        Some(
            self.compositor
                .preview(&self.manipulator.transform(), &self.blend, mode),
        )
    }

    /// Flattens `base` with the current overlay at the photo's native
    /// resolution. Never mutates the session.
    pub fn export(
        &self,
        base: &RgbaImage,
        loader: &dyn AssetLoader,
        format: ExportFormat,
    ) -> Result<FlattenedImage, CompositeError> {
        if !self.overlay_visible {
            return self.compositor.flatten(base, self.container, None, format);
        }

        let asset = self.asset.as_ref().ok_or(CompositeError::NoAssetSelected)?;
        let overlay = loader.load(asset).map_err(|err| {
            tracing::warn!("[session] overlay '{}' failed to load: {err}", asset.id);
            err
        })?;

        let layer = OverlayLayer {
            image: &overlay,
            transform: self.manipulator.transform(),
            blend: self.blend,
            mode: BlendMode::detect(&overlay),
        };
        self.compositor
            .flatten(base, self.container, Some(&layer), format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{AssetError, AssetSource, MemoryAssetLoader};
    use crate::geometry::Point;

    fn container() -> ContainerSize {
        ContainerSize::new(1000.0, 1000.0)
    }

    fn session() -> OverlaySession {
        OverlaySession::new(EngineConfig::default(), container())
    }

    fn frame(id: &str, width_mm: f32) -> OverlayAsset {
        OverlayAsset::new(id, AssetSource::Path(format!("{id}.png")), Some(width_mm))
    }

    fn level_eyes() -> LandmarkPair {
        LandmarkPair::new(Point::new(0.35, 0.5), Point::new(0.65, 0.5))
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_new_session_is_centered() {
        let s = session();
        assert_eq!(s.transform(), PlacementTransform::new(500.0, 500.0, 1.0, 0.0));
        assert_eq!(s.blend(), BlendParameters::new(105.0, 110.0));
        assert!(!s.is_pending());
    }

    #[test]
    fn test_landmarks_align_on_arrival() {
        let mut s = session();
        s.select_asset(frame("a", 140.0));
        let ticket = s.load_photo(PhotoId::new()).expect("detection should be issued");
        assert!(s.is_pending());

        let outcome = s.complete_detection(ticket, Some(level_eyes()));
        assert!(matches!(outcome, DetectionOutcome::Aligned(_)));
        assert!(!s.is_pending());

        let t = s.transform();
        assert!(approx(t.x, 500.0));
        assert!(approx(t.y, 500.0));
        assert!(approx(t.scale, 2.2222));
        assert_eq!(t.rotation_degrees, 0.0);
        assert_eq!(s.last_trigger(), Some(AlignTrigger::PhotoLoaded));
    }

    #[test]
    fn test_asset_change_reuses_cached_landmarks() {
        let mut s = session();
        s.select_asset(frame("a", 70.0));
        let ticket = s.load_photo(PhotoId::new()).unwrap();
        s.complete_detection(ticket, Some(level_eyes()));
        let narrow = s.transform().scale;

        // No new detection request for the same photo.
        assert!(s.select_asset(frame("b", 140.0)).is_none());
        assert!(approx(s.transform().scale, narrow * 2.0));
        assert_eq!(s.last_trigger(), Some(AlignTrigger::AssetChanged));
    }

    #[test]
    fn test_manual_edits_are_sticky_until_trigger() {
        let mut s = session();
        s.select_asset(frame("a", 140.0));
        let ticket = s.load_photo(PhotoId::new()).unwrap();
        s.complete_detection(ticket, Some(level_eyes()));

        s.handle_pointer(&PointerEvent::MouseDown { x: 0.0, y: 0.0 });
        s.handle_pointer(&PointerEvent::MouseMove { x: 30.0, y: -10.0 });
        s.handle_pointer(&PointerEvent::MouseUp { x: 30.0, y: -10.0 });
        assert!(s.set_scale(1.0));
        assert!(!s.auto_align_enabled());

        let edited = s.transform();
        assert!(approx(edited.x, 530.0));
        assert!(approx(edited.y, 490.0));

        // Reloading the same photo is not a trigger.
        let id = s.photo_id().unwrap();
        assert!(s.load_photo(id).is_none());
        assert_eq!(s.transform(), edited);

        // Selecting an asset is.
        s.select_asset(frame("b", 140.0));
        assert!(s.auto_align_enabled());
        assert!(approx(s.transform().x, 500.0));
        assert!(approx(s.transform().scale, 2.2222));
    }

    #[test]
    fn test_edit_while_pending_wins_over_late_landmarks() {
        let mut s = session();
        s.select_asset(frame("a", 140.0));
        let ticket = s.load_photo(PhotoId::new()).unwrap();

        s.begin_drag(0.0, 0.0);
        s.update_drag(-100.0, 0.0);
        s.end_drag();

        let outcome = s.complete_detection(ticket, Some(level_eyes()));
        assert!(matches!(outcome, DetectionOutcome::Cached(_)));
        assert!(approx(s.transform().x, 400.0));
        assert_eq!(s.landmarks(), Some(level_eyes()));
    }

    #[test]
    fn test_stale_result_is_discarded() {
        let mut s = session();
        s.select_asset(frame("a", 140.0));
        let first = s.load_photo(PhotoId::new()).unwrap();
        let second = s.load_photo(PhotoId::new()).unwrap();
        assert_ne!(first, second);

        let before = s.transform();
        assert_eq!(
            s.complete_detection(first, Some(level_eyes())),
            DetectionOutcome::Stale
        );
        assert_eq!(s.transform(), before);
        assert!(s.is_pending());

        assert!(matches!(
            s.complete_detection(second, Some(level_eyes())),
            DetectionOutcome::Aligned(_)
        ));
        // A duplicate completion is stale too.
        assert_eq!(
            s.complete_detection(second, Some(level_eyes())),
            DetectionOutcome::Stale
        );
    }

    #[test]
    fn test_switching_photos_clears_cache_and_redetects() {
        let mut s = session();
        s.select_asset(frame("a", 140.0));
        let ticket = s.load_photo(PhotoId::new()).unwrap();
        s.complete_detection(ticket, Some(level_eyes()));
        assert!(s.landmarks().is_some());

        let next = s.load_photo(PhotoId::new());
        assert!(next.is_some());
        assert!(s.landmarks().is_none());
        assert_eq!(s.transform(), PlacementTransform::new(500.0, 500.0, 1.0, 0.0));
    }

    #[test]
    fn test_no_landmarks_keeps_transform() {
        let mut s = session();
        s.select_asset(frame("a", 140.0));
        let ticket = s.load_photo(PhotoId::new()).unwrap();
        s.set_rotation(15.0);
        let before = s.transform();

        assert_eq!(s.fail_detection(ticket), DetectionOutcome::NoLandmarks);
        assert_eq!(s.transform(), before);
        assert_eq!(s.landmark_state(), Some(LandmarkState::Failed));
        // Not retried implicitly.
        assert!(s.select_asset(frame("b", 120.0)).is_none());
        // But can be retried explicitly.
        assert!(s.request_detection().is_some());
    }

    #[test]
    fn test_degenerate_landmarks_are_detection_failure() {
        let mut s = session();
        s.select_asset(frame("a", 140.0));
        let ticket = s.load_photo(PhotoId::new()).unwrap();
        let p = Point::new(0.5, 0.5);

        assert_eq!(
            s.complete_detection(ticket, Some(LandmarkPair::new(p, p))),
            DetectionOutcome::Degenerate
        );
        assert!(s.transform().scale > 0.0);
        assert_eq!(s.transform(), PlacementTransform::new(500.0, 500.0, 1.0, 0.0));
    }

    #[test]
    fn test_reset_all_realigns_and_restores_blend() {
        let mut s = session();
        s.select_asset(frame("a", 140.0));
        let ticket = s.load_photo(PhotoId::new()).unwrap();
        s.complete_detection(ticket, Some(level_eyes()));
        s.set_scale(0.75);
        s.set_blend(BlendParameters::new(60.0, 140.0));

        s.reset_all();
        assert_eq!(s.blend(), BlendParameters::new(105.0, 110.0));
        assert!(approx(s.transform().scale, 2.2222));
        assert_eq!(s.last_trigger(), Some(AlignTrigger::Reset));
    }

    #[test]
    fn test_reset_all_without_landmarks_centers() {
        let mut s = session();
        s.set_scale(2.0);
        s.set_rotation(-20.0);
        s.reset_all();
        assert_eq!(s.transform(), PlacementTransform::new(500.0, 500.0, 1.0, 0.0));
    }

    #[test]
    fn test_fusion_flow_hides_overlay() {
        let mut s = session();
        s.select_asset(frame("a", 140.0));
        let ticket = s.load_photo(PhotoId::new()).unwrap();
        s.complete_detection(
            ticket,
            Some(LandmarkPair::new(Point::new(0.3, 0.45), Point::new(0.7, 0.55))),
        );

        let hints = s.fusion_request(ContainerSize::new(800.0, 600.0));
        assert!(approx(hints.center.x, 0.5));
        assert!((hints.rotation_degrees - 10.62).abs() < 1e-2);

        s.apply_fusion_result(PhotoId::new());
        assert!(!s.overlay_visible());
        assert!(s.preview(None).is_none());
        assert!(!s.handle_pointer(&PointerEvent::MouseDown { x: 1.0, y: 1.0 }));
        assert_eq!(s.fusion_request(ContainerSize::new(800.0, 600.0)), FusionHints::default());

        let ticket = s.show_overlay().expect("fused photo needs detection");
        assert!(s.overlay_visible());
        assert!(s.show_overlay().is_none());
        assert!(matches!(
            s.complete_detection(ticket, Some(level_eyes())),
            DetectionOutcome::Aligned(_)
        ));
    }

    #[test]
    fn test_container_change_does_not_realign() {
        let mut s = session();
        let before = s.transform();
        assert!(s.set_container(ContainerSize::new(400.0, 300.0)));
        assert!(!s.set_container(ContainerSize::new(0.0, 300.0)));
        assert_eq!(s.transform(), before);
        assert_eq!(s.container(), ContainerSize::new(400.0, 300.0));
    }

    #[test]
    fn test_preview_requires_asset() {
        let mut s = session();
        assert!(s.preview(None).is_none());
        s.select_asset(frame("a", 140.0));
        let layer = s.preview(None).unwrap();
        assert_eq!(layer.mix_blend_mode, "multiply");
        assert_eq!(layer.css_filter, "contrast(110%) brightness(105%)");
    }

    #[test]
    fn test_export_failure_leaves_state_untouched() {
        let mut s = session();
        s.select_asset(frame("missing", 140.0));
        s.set_rotation(12.0);
        let before = s.transform();
        let base = RgbaImage::new(20, 20);

        let err = s
            .export(&base, &MemoryAssetLoader::new(), ExportFormat::Png)
            .unwrap_err();
        assert!(matches!(err, CompositeError::Asset(AssetError::NotFound(_))));
        assert_eq!(s.transform(), before);
    }

    #[test]
    fn test_export_without_asset_fails() {
        let s = session();
        let base = RgbaImage::new(20, 20);
        assert!(matches!(
            s.export(&base, &MemoryAssetLoader::new(), ExportFormat::Png),
            Err(CompositeError::NoAssetSelected)
        ));
    }
}
