//! SurfaceFrames - latching state of one surface

use std::collections::VecDeque;
use std::sync::Arc;

use contracts::{
    AcquireResult, BufferItem, ContentAcquirer, ContentInfo, FrameQueueConfig, Nsecs, SurfaceId,
    NSECS_PER_MS,
};
use tracing::{debug, error, trace};

use crate::queue::FrameConsumer;
use crate::sync_point::SyncPoint;

/// Result of one latch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchOutcome {
    /// Nothing queued
    Idle,
    /// Already latched this cycle; waits for the next composition
    RefreshPending,
    /// Sideband stream changed; the whole surface is dirty
    Sideband,
    /// Head acquire fence still pending
    FenceNotSignaled,
    /// A deferred transaction on another surface has not been applied yet
    WaitingForTransactions,
    /// Acquirer asked to retry later
    PresentLater,
    /// Head item refused and dropped
    Rejected { frame_number: u64 },
    /// Surface is quarantined after an acquisition failure
    Quarantined,
    Latched {
        frame_number: u64,
        /// Geometry-relevant properties of the content changed
        recompute_visible_regions: bool,
    },
}

impl LatchOutcome {
    /// The surface wants another tick to make progress.
    pub fn needs_retry(&self) -> bool {
        matches!(
            self,
            LatchOutcome::FenceNotSignaled
                | LatchOutcome::WaitingForTransactions
                | LatchOutcome::PresentLater
        )
    }
}

/// Frame queue, latched content and local sync points of one surface.
#[derive(Debug)]
pub struct SurfaceFrames {
    id: SurfaceId,
    consumer: FrameConsumer,
    queue: VecDeque<BufferItem>,
    current_frame: u64,
    previous_frame: u64,
    active: Option<BufferItem>,
    local_sync_points: Vec<Arc<SyncPoint>>,
    quarantined: bool,
    refresh_pending: bool,
    sideband: bool,
    auto_refresh: bool,
    latch_unsignaled: bool,
    plausibility: Nsecs,
}

impl SurfaceFrames {
    pub fn new(consumer: FrameConsumer, config: &FrameQueueConfig) -> Self {
        Self {
            id: consumer.surface(),
            consumer,
            queue: VecDeque::new(),
            current_frame: 0,
            previous_frame: 0,
            active: None,
            local_sync_points: Vec::new(),
            quarantined: false,
            refresh_pending: false,
            sideband: false,
            auto_refresh: false,
            latch_unsignaled: config.latch_unsignaled,
            plausibility: config.present_plausibility_ms as Nsecs * NSECS_PER_MS,
        }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn consumer(&self) -> &FrameConsumer {
        &self.consumer
    }

    fn pull(&mut self) {
        self.consumer.drain_into(&mut self.queue);
        if self.quarantined && !self.queue.is_empty() {
            let n = self.queue.len();
            self.drop_front(n);
        }
    }

    pub fn queued_frames(&mut self) -> usize {
        self.pull();
        self.queue.len()
    }

    pub fn has_queued_frame(&mut self) -> bool {
        self.queued_frames() > 0 || self.consumer.sideband_pending() || self.auto_refresh
    }

    pub fn current_frame_number(&self) -> u64 {
        self.current_frame
    }

    pub fn previous_frame_number(&self) -> u64 {
        self.previous_frame
    }

    pub fn is_quarantined(&self) -> bool {
        self.quarantined
    }

    pub fn is_refresh_pending(&self) -> bool {
        self.refresh_pending
    }

    pub fn local_sync_points(&self) -> &[Arc<SyncPoint>] {
        &self.local_sync_points
    }

    /// Frame number at the head of the queue, or the current one.
    pub fn head_frame_number(&mut self) -> u64 {
        self.pull();
        self.queue
            .front()
            .map_or(self.current_frame, |item| item.frame_number)
    }

    pub fn head_fence_has_signaled(&mut self) -> bool {
        if self.latch_unsignaled {
            return true;
        }
        self.pull();
        match self.queue.front() {
            None => true,
            Some(head) if head.is_droppable => true,
            Some(head) => !head.acquire_fence.is_pending(),
        }
    }

    /// Register a barrier on this surface.
    ///
    /// Returns false if `point`'s frame was already latched; the caller
    /// then applies its transaction immediately.
    pub fn add_sync_point(&mut self, point: Arc<SyncPoint>) -> bool {
        if point.frame_number() <= self.current_frame {
            return false;
        }
        self.local_sync_points.push(point);
        true
    }

    /// Mark local points whose frame is queued and ready as available.
    pub fn notify_available_frames(&mut self) {
        let head = self.head_frame_number();
        let signaled = self.head_fence_has_signaled();
        if !signaled {
            return;
        }
        for point in &self.local_sync_points {
            if head >= point.frame_number() && point.set_frame_available() {
                trace!(surface = %self.id, frame = point.frame_number(), "sync point frame available");
            }
        }
    }

    /// All deferred transactions waiting on frames up to the head have been
    /// applied. Points not yet marked available are marked now, and the
    /// latch is retried on a later tick.
    pub fn all_transactions_signaled(&mut self) -> bool {
        let head = self.head_frame_number();
        let mut applied = true;
        for point in &self.local_sync_points {
            if point.frame_number() > head {
                continue;
            }
            if !point.frame_is_available() {
                point.set_frame_available();
                return false;
            }
            applied &= point.transaction_is_applied();
        }
        applied
    }

    /// Whether the head frame is due for the refresh at `expected_present`.
    pub fn should_present_now(&mut self, expected_present: Nsecs) -> bool {
        if self.consumer.sideband_pending() || self.auto_refresh {
            return true;
        }
        self.pull();
        let Some(head) = self.queue.front() else {
            return false;
        };
        let is_due = head.timestamp < expected_present;
        let is_plausible = head.timestamp < expected_present.saturating_add(self.plausibility);
        is_due || !is_plausible
    }

    /// Try to make the head frame the surface's content.
    pub fn latch(
        &mut self,
        expected_present: Nsecs,
        acquirer: &mut dyn ContentAcquirer,
    ) -> LatchOutcome {
        if self.consumer.take_sideband_changed() {
            self.sideband = true;
            return LatchOutcome::Sideband;
        }
        if self.quarantined {
            self.pull();
            return LatchOutcome::Quarantined;
        }
        if self.queued_frames() == 0 && !self.auto_refresh {
            return LatchOutcome::Idle;
        }
        if self.refresh_pending {
            return LatchOutcome::RefreshPending;
        }
        if !self.head_fence_has_signaled() {
            return LatchOutcome::FenceNotSignaled;
        }
        if !self.all_transactions_signaled() {
            return LatchOutcome::WaitingForTransactions;
        }

        // Auto-refresh with nothing new: keep presenting the active buffer
        if self.queue.is_empty() {
            self.refresh_pending = true;
            return LatchOutcome::Latched {
                frame_number: self.current_frame,
                recompute_visible_regions: false,
            };
        }

        let stale = self.count_stale(expected_present);
        if stale > 0 {
            self.drop_front(stale);
        }

        let Some(head) = self.queue.front().cloned() else {
            return LatchOutcome::Idle;
        };
        match acquirer.acquire(self.id, &head, expected_present) {
            AcquireResult::Acquired => {}
            AcquireResult::PresentLater => return LatchOutcome::PresentLater,
            AcquireResult::Rejected => {
                self.drop_front(1);
                debug!(surface = %self.id, frame = head.frame_number, "buffer rejected");
                return LatchOutcome::Rejected {
                    frame_number: head.frame_number,
                };
            }
            AcquireResult::Failed(reason) => {
                let n = self.queue.len();
                self.drop_front(n);
                self.quarantined = true;
                self.consumer.metrics().set_quarantined(true);
                metrics::counter!("framesched_quarantines_total").increment(1);
                error!(
                    surface = %self.id,
                    frame = head.frame_number,
                    reason = %reason,
                    "content acquisition failed, surface quarantined"
                );
                return LatchOutcome::Quarantined;
            }
        }

        self.queue.pop_front();
        self.consumer.release(1);
        self.consumer.metrics().inc_latched_count();

        let recompute = match &self.active {
            None => true,
            Some(old) => {
                old.crop != head.crop
                    || old.scaling_mode != head.scaling_mode
                    || old.buffer.width != head.buffer.width
                    || old.buffer.height != head.buffer.height
                    || old.buffer.format.has_alpha() != head.buffer.format.has_alpha()
            }
        };

        self.previous_frame = self.current_frame;
        self.current_frame = head.frame_number;
        self.auto_refresh = head.auto_refresh;
        self.active = Some(head);
        self.refresh_pending = true;
        self.sideband = false;

        let current = self.current_frame;
        self.local_sync_points
            .retain(|point| !(point.is_complete() && point.frame_number() <= current));

        metrics::counter!("framesched_latches_total").increment(1);
        trace!(surface = %self.id, frame = current, "buffer latched");
        LatchOutcome::Latched {
            frame_number: current,
            recompute_visible_regions: recompute,
        }
    }

    /// Items ahead of the one that will be latched: a queued frame whose
    /// successor is already due (and ready) is stale.
    fn count_stale(&self, expected_present: Nsecs) -> usize {
        let mut stale = 0;
        while stale + 1 < self.queue.len() {
            let next = &self.queue[stale + 1];
            let ready = next.is_droppable || self.latch_unsignaled || !next.acquire_fence.is_pending();
            let blocked = self
                .local_sync_points
                .iter()
                .any(|p| p.frame_number() <= next.frame_number && !p.is_complete());
            if next.timestamp >= expected_present || !ready || blocked {
                break;
            }
            stale += 1;
        }
        stale
    }

    fn drop_front(&mut self, n: usize) {
        let n = n.min(self.queue.len());
        self.queue.drain(..n);
        self.consumer.release(n);
        self.consumer.metrics().add_dropped_count(n as u64);
        if n > 0 {
            metrics::counter!("framesched_frames_dropped_total").increment(n as u64);
        }
    }

    /// Start of composition: the latched frame is being used. Returns true
    /// if the surface still has work (queued frames, sideband, auto-refresh).
    pub fn pre_composition(&mut self) -> bool {
        self.refresh_pending = false;
        self.queued_frames() > 0 || self.consumer.sideband_pending() || self.auto_refresh
    }

    /// Release every local barrier (hidden or removed surface).
    pub fn clear_sync_points(&mut self) {
        for point in self.local_sync_points.drain(..) {
            point.set_frame_available();
        }
    }

    pub fn reset_quarantine(&mut self) {
        if self.quarantined {
            debug!(surface = %self.id, "quarantine lifted");
        }
        self.quarantined = false;
        self.consumer.metrics().set_quarantined(false);
    }

    pub fn content(&self) -> Option<ContentInfo> {
        self.active.as_ref().map(|item| ContentInfo {
            buffer: item.buffer,
            crop: item.crop,
            scaling_mode: item.scaling_mode,
            frame_number: item.frame_number,
        })
    }

    pub fn has_sideband(&self) -> bool {
        self.sideband
    }

    /// Desired present time of the latched frame.
    pub fn active_timestamp(&self) -> Option<Nsecs> {
        self.active.as_ref().map(|item| item.timestamp)
    }
}
