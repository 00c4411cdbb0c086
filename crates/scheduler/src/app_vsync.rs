//! Client vsync events at the app phase offset

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use contracts::Nsecs;
use tokio::sync::broadcast;
use tracing::trace;
use vsync::VsyncCallback;

use crate::hw_vsync::HwVsyncController;

/// Vsync delivery to clients.
///
/// Like the scheduler's own source, one request lets one event through; the
/// event fans out to every subscriber. Requests after an idle spell resync
/// hardware vsync first (rate limited).
pub struct AppVsyncSource {
    hw_vsync: Arc<HwVsyncController>,
    tx: broadcast::Sender<Nsecs>,
    requested: AtomicBool,
    delivered: AtomicU64,
}

impl AppVsyncSource {
    pub fn new(hw_vsync: Arc<HwVsyncController>, capacity: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self {
            hw_vsync,
            tx,
            requested: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Nsecs> {
        self.tx.subscribe()
    }

    /// Deliver the next app vsync to subscribers.
    pub fn request_next_vsync(&self) {
        self.hw_vsync.resync_with_rate_limit();
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl VsyncCallback for AppVsyncSource {
    fn on_vsync(&self, when: Nsecs) {
        if !self.requested.swap(false, Ordering::AcqRel) {
            return;
        }
        match self.tx.send(when) {
            Ok(receivers) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                trace!(when, receivers, "app vsync delivered");
            }
            Err(_) => trace!(when, "app vsync requested with no subscribers"),
        }
    }
}
