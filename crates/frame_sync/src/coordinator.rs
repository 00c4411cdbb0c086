//! SyncCoordinator - latching and cross-surface barriers for all surfaces

use std::collections::BTreeMap;
use std::sync::Arc;

use contracts::{
    ContentAcquirer, ContentInfo, FrameQueueConfig, LatchedContent, Nsecs, SurfaceId,
};
use tracing::{debug, info, instrument, warn};

use crate::metrics::FrameQueueSnapshot;
use crate::queue::FrameConsumer;
use crate::surface::{LatchOutcome, SurfaceFrames};
use crate::sync_point::SyncPoint;

/// Result of `defer_until`.
#[derive(Debug, Clone)]
pub enum Deferral {
    /// No barrier needed; apply the state on the next commit
    Immediate,
    /// Hold the state until this point's frame is available
    Pending(Arc<SyncPoint>),
}

/// Owns every surface's frame queue consumer. Lives in the main context.
#[derive(Debug)]
pub struct SyncCoordinator {
    surfaces: BTreeMap<SurfaceId, SurfaceFrames>,
    config: FrameQueueConfig,
}

impl SyncCoordinator {
    pub fn new(config: &FrameQueueConfig) -> Self {
        Self {
            surfaces: BTreeMap::new(),
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &FrameQueueConfig {
        &self.config
    }

    pub fn register(&mut self, consumer: FrameConsumer) {
        let id = consumer.surface();
        debug!(surface = %id, "frame queue registered");
        self.surfaces.insert(id, SurfaceFrames::new(consumer, &self.config));
    }

    /// Drop a surface's queue; nothing may keep waiting on its frames.
    pub fn unregister(&mut self, id: SurfaceId) -> bool {
        match self.surfaces.remove(&id) {
            Some(mut frames) => {
                frames.clear_sync_points();
                frames.consumer().close();
                debug!(surface = %id, "frame queue unregistered");
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: SurfaceId) -> bool {
        self.surfaces.contains_key(&id)
    }

    pub fn surface_ids(&self) -> Vec<SurfaceId> {
        self.surfaces.keys().copied().collect()
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&SurfaceFrames> {
        self.surfaces.get(&id)
    }

    /// Barrier: hold a transaction until `barrier` shows `frame_number`.
    ///
    /// An unknown barrier fails open so that nothing waits on a surface that
    /// will never produce.
    pub fn defer_until(&mut self, barrier: SurfaceId, frame_number: u64) -> Deferral {
        let Some(frames) = self.surfaces.get_mut(&barrier) else {
            warn!(barrier = %barrier, frame_number, "defer_until on unknown surface, applying immediately");
            return Deferral::Immediate;
        };
        let point = Arc::new(SyncPoint::new(frame_number));
        if frames.add_sync_point(Arc::clone(&point)) {
            debug!(barrier = %barrier, frame_number, "sync point registered");
            Deferral::Pending(point)
        } else {
            Deferral::Immediate
        }
    }

    pub fn notify_available_frames(&mut self) {
        for frames in self.surfaces.values_mut() {
            frames.notify_available_frames();
        }
    }

    pub fn has_queued_frame(&mut self, id: SurfaceId) -> bool {
        self.surfaces
            .get_mut(&id)
            .is_some_and(|frames| frames.has_queued_frame())
    }

    pub fn should_present_now(&mut self, id: SurfaceId, expected_present: Nsecs) -> bool {
        self.surfaces
            .get_mut(&id)
            .is_some_and(|frames| frames.should_present_now(expected_present))
    }

    /// Try to latch one frame for `id`.
    #[instrument(name = "frame_latch", skip(self, acquirer), level = "trace")]
    pub fn latch(
        &mut self,
        id: SurfaceId,
        expected_present: Nsecs,
        acquirer: &mut dyn ContentAcquirer,
    ) -> LatchOutcome {
        match self.surfaces.get_mut(&id) {
            Some(frames) => frames.latch(expected_present, acquirer),
            None => LatchOutcome::Idle,
        }
    }

    /// Start of composition for every surface. Returns true if any surface
    /// still has frames, a sideband change or auto-refresh pending.
    pub fn pre_composition(&mut self) -> bool {
        let mut more = false;
        for frames in self.surfaces.values_mut() {
            more |= frames.pre_composition();
        }
        more
    }

    pub fn clear_sync_points(&mut self, id: SurfaceId) {
        if let Some(frames) = self.surfaces.get_mut(&id) {
            frames.clear_sync_points();
        }
    }

    pub fn reset_quarantine(&mut self, id: SurfaceId) -> bool {
        match self.surfaces.get_mut(&id) {
            Some(frames) => {
                frames.reset_quarantine();
                info!(surface = %id, "surface quarantine reset");
                true
            }
            None => false,
        }
    }

    pub fn current_frame_number(&self, id: SurfaceId) -> Option<u64> {
        self.surfaces.get(&id).map(SurfaceFrames::current_frame_number)
    }

    pub fn queue_snapshot(&self, id: SurfaceId) -> Option<FrameQueueSnapshot> {
        self.surfaces
            .get(&id)
            .map(|frames| frames.consumer().metrics().snapshot())
    }
}

impl LatchedContent for SyncCoordinator {
    fn content(&self, surface: SurfaceId) -> Option<ContentInfo> {
        self.surfaces.get(&surface)?.content()
    }

    fn has_sideband(&self, surface: SurfaceId) -> bool {
        self.surfaces
            .get(&surface)
            .is_some_and(SurfaceFrames::has_sideband)
    }
}
