//! Frame queue metrics for observability

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Counters for one surface's frame queue.
///
/// Shared between the producer handle and the coordinator. `queue_len`
/// doubles as the admission count that bounds the queue.
#[derive(Debug, Default)]
pub struct FrameQueueMetrics {
    /// Frames admitted and not yet latched or dropped
    queue_len: AtomicUsize,
    /// Total frames admitted
    queued_count: AtomicU64,
    /// Total frames latched
    latched_count: AtomicU64,
    /// Frames dropped (stale, rejected or cleared)
    dropped_count: AtomicU64,
    /// Producer calls refused (order / full / closed / quarantined)
    refused_count: AtomicU64,
    /// Content acquisition failed; set by the coordinator
    quarantined: AtomicBool,
}

impl FrameQueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Acquire)
    }

    /// Reserve a slot; false if `capacity` is already reached.
    pub fn try_admit(&self, capacity: usize) -> bool {
        let admitted = self
            .queue_len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
                (len < capacity).then_some(len + 1)
            })
            .is_ok();
        if admitted {
            self.queued_count.fetch_add(1, Ordering::Relaxed);
        }
        admitted
    }

    /// Give back `n` slots.
    pub fn release(&self, n: usize) {
        if n == 0 {
            return;
        }
        let _ = self
            .queue_len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
                Some(len.saturating_sub(n))
            });
    }

    pub fn queued_count(&self) -> u64 {
        self.queued_count.load(Ordering::Relaxed)
    }

    pub fn latched_count(&self) -> u64 {
        self.latched_count.load(Ordering::Relaxed)
    }

    pub fn inc_latched_count(&self) {
        self.latched_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn add_dropped_count(&self, n: u64) {
        self.dropped_count.fetch_add(n, Ordering::Relaxed);
    }

    pub fn refused_count(&self) -> u64 {
        self.refused_count.load(Ordering::Relaxed)
    }

    pub fn inc_refused_count(&self) {
        self.refused_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_quarantined(&self) -> bool {
        self.quarantined.load(Ordering::Acquire)
    }

    pub fn set_quarantined(&self, quarantined: bool) {
        self.quarantined.store(quarantined, Ordering::Release);
    }

    pub fn snapshot(&self) -> FrameQueueSnapshot {
        FrameQueueSnapshot {
            queue_len: self.queue_len(),
            queued_count: self.queued_count(),
            latched_count: self.latched_count(),
            dropped_count: self.dropped_count(),
            refused_count: self.refused_count(),
            quarantined: self.is_quarantined(),
        }
    }
}

/// Snapshot of frame queue metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameQueueSnapshot {
    pub queue_len: usize,
    pub queued_count: u64,
    pub latched_count: u64,
    pub dropped_count: u64,
    pub refused_count: u64,
    pub quarantined: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_bounded() {
        let metrics = FrameQueueMetrics::new();
        assert!(metrics.try_admit(2));
        assert!(metrics.try_admit(2));
        assert!(!metrics.try_admit(2), "third admission must be refused");
        metrics.release(1);
        assert!(metrics.try_admit(2));
        assert_eq!(metrics.queued_count(), 3);
        assert_eq!(metrics.queue_len(), 2);
    }

    #[test]
    fn test_release_saturates() {
        let metrics = FrameQueueMetrics::new();
        metrics.release(5);
        assert_eq!(metrics.queue_len(), 0);
    }
}
