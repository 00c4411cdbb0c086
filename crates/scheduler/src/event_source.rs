//! Bridge from the vsync dispatch thread to the scheduler task

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use contracts::Nsecs;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{trace, warn};
use vsync::VsyncCallback;

/// One-shot vsync delivery: each `request_next_vsync` lets exactly one
/// event through to the scheduler.
#[derive(Debug)]
pub struct VsyncEventSource {
    tx: mpsc::Sender<Nsecs>,
    requested: AtomicBool,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl VsyncEventSource {
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Nsecs>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let source = Arc::new(Self {
            tx,
            requested: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        (source, rx)
    }

    /// Deliver the next vsync event. Idempotent until it fires.
    pub fn request_next_vsync(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl VsyncCallback for VsyncEventSource {
    fn on_vsync(&self, when: Nsecs) {
        if !self.requested.swap(false, Ordering::AcqRel) {
            return;
        }
        match self.tx.try_send(when) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                trace!(when, "vsync delivered to scheduler");
            }
            Err(TrySendError::Full(_)) => {
                // scheduler is behind; it still has an event to process
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(when, "scheduler vsync channel full, event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
