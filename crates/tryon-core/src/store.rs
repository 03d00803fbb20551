//! Shared session handle

use parking_lot::RwLock;
use std::sync::Arc;

use crate::detection::{DetectionOutcome, DetectionTicket, PhotoId};
use crate::geometry::{LandmarkPair, PlacementTransform};
use crate::session::OverlaySession;

/// Cloneable handle to one [`OverlaySession`], shared between the UI
/// thread and detector workers.
#[derive(Debug, Clone)]
pub struct SessionStore {
    session: Arc<RwLock<OverlaySession>>,
}

impl SessionStore {
    pub fn new(session: OverlaySession) -> Self {
        Self {
            session: Arc::new(RwLock::new(session)),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&OverlaySession) -> R) -> R {
        let session = self.session.read();
        f(&session)
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut OverlaySession) -> R) -> R {
        let mut session = self.session.write();
        f(&mut session)
    }

    pub fn transform(&self) -> PlacementTransform {
        self.session.read().transform()
    }

    pub fn load_photo(&self, id: PhotoId) -> Option<DetectionTicket> {
        self.session.write().load_photo(id)
    }

    pub fn complete_detection(
        &self,
        ticket: DetectionTicket,
        result: Option<LandmarkPair>,
    ) -> DetectionOutcome {
        self.session.write().complete_detection(ticket, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{AssetSource, OverlayAsset};
    use crate::config::EngineConfig;
    use crate::geometry::{ContainerSize, Point};
    use std::thread;

    #[test]
    fn test_detection_completes_from_worker_thread() {
        let store = SessionStore::new(OverlaySession::new(
            EngineConfig::default(),
            ContainerSize::new(1000.0, 1000.0),
        ));
        store.write(|s| {
            s.select_asset(OverlayAsset::new(
                "a",
                AssetSource::Path("a.png".into()),
                Some(140.0),
            ))
        });
        let ticket = store.load_photo(PhotoId::new()).unwrap();

        let worker = store.clone();
        let outcome = thread::spawn(move || {
            worker.complete_detection(
                ticket,
                Some(LandmarkPair::new(Point::new(0.35, 0.5), Point::new(0.65, 0.5))),
            )
        })
        .join()
        .unwrap();

        assert!(matches!(outcome, DetectionOutcome::Aligned(_)));
        assert!((store.transform().scale - 2.2222).abs() < 1e-3);
        assert!(!store.read(OverlaySession::is_pending));
    }

    #[test]
    fn test_stale_completion_from_worker_is_ignored() {
        let store = SessionStore::new(OverlaySession::new(
            EngineConfig::default(),
            ContainerSize::new(640.0, 480.0),
        ));
        let stale = store.load_photo(PhotoId::new()).unwrap();
        let current = store.load_photo(PhotoId::new()).unwrap();

        let handles: Vec<_> = [stale, current]
            .into_iter()
            .map(|ticket| {
                let worker = store.clone();
                thread::spawn(move || {
                    worker.complete_detection(
                        ticket,
                        Some(LandmarkPair::new(Point::new(0.4, 0.5), Point::new(0.6, 0.5))),
                    )
                })
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(outcomes[0], DetectionOutcome::Stale);
        // No asset selected: landmarks are cached, not applied.
        assert!(matches!(outcomes[1], DetectionOutcome::Cached(_)));
        assert!(store.read(|s| s.landmarks().is_some()));
    }
}
