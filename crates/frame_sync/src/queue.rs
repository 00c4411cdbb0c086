//! Per-surface frame queue: producer handle + coordinator-side consumer

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_channel::{bounded, Receiver, Sender, TrySendError};
use contracts::{BufferItem, ContractError, SurfaceId};
use tokio::sync::Notify;
use tracing::{error, trace, warn};

use crate::metrics::FrameQueueMetrics;

/// Message from a producer to the coordinator.
#[derive(Debug, Clone)]
pub enum ProducerEvent {
    /// New frame appended to the queue
    Available(BufferItem),
    /// Replaces the most recently queued frame
    Replaced(BufferItem),
}

/// State shared by both ends of one surface's queue.
#[derive(Debug)]
struct QueueShared {
    surface: SurfaceId,
    capacity: usize,
    /// Last frame number accepted from the producer
    last_frame: Mutex<u64>,
    sideband_changed: AtomicBool,
    metrics: Arc<FrameQueueMetrics>,
    wake: Arc<Notify>,
}

/// Create the queue for `surface`.
///
/// `wake` is notified on every admission so that the scheduler schedules a
/// tick.
pub fn frame_channel(
    surface: SurfaceId,
    capacity: usize,
    wake: Arc<Notify>,
) -> (FrameProducer, FrameConsumer) {
    let capacity = capacity.max(1);
    let (tx, rx) = bounded(capacity);
    let shared = Arc::new(QueueShared {
        surface,
        capacity,
        last_frame: Mutex::new(0),
        sideband_changed: AtomicBool::new(false),
        metrics: Arc::new(FrameQueueMetrics::new()),
        wake,
    });
    (
        FrameProducer {
            tx,
            shared: Arc::clone(&shared),
        },
        FrameConsumer { rx, shared },
    )
}

/// Producer side of a surface's frame queue.
///
/// Cloneable and usable from any thread.
#[derive(Debug, Clone)]
pub struct FrameProducer {
    tx: Sender<ProducerEvent>,
    shared: Arc<QueueShared>,
}

impl FrameProducer {
    pub fn surface(&self) -> SurfaceId {
        self.shared.surface
    }

    pub fn metrics(&self) -> &Arc<FrameQueueMetrics> {
        &self.shared.metrics
    }

    /// Queue a new frame.
    ///
    /// Frame numbers must increase by exactly one; frame 1 starts a new
    /// epoch.
    pub fn on_frame_available(&self, item: BufferItem) -> Result<(), ContractError> {
        self.check_quarantine()?;
        let mut last = self.shared.last_frame.lock().unwrap_or_else(PoisonError::into_inner);
        self.check_order(*last, item.frame_number)?;

        if !self.shared.metrics.try_admit(self.shared.capacity) {
            return Err(self.refuse(ContractError::FrameQueueFull {
                surface: self.shared.surface,
                capacity: self.shared.capacity,
            }));
        }

        let frame_number = item.frame_number;
        if let Err(e) = self.send(ProducerEvent::Available(item)) {
            self.shared.metrics.release(1);
            return Err(e);
        }
        *last = frame_number;
        trace!(surface = %self.shared.surface, frame_number, "frame queued");
        Ok(())
    }

    /// Replace the most recently queued frame (droppable producers).
    pub fn on_frame_replaced(&self, item: BufferItem) -> Result<(), ContractError> {
        self.check_quarantine()?;
        let mut last = self.shared.last_frame.lock().unwrap_or_else(PoisonError::into_inner);
        self.check_order(*last, item.frame_number)?;

        let frame_number = item.frame_number;
        self.send(ProducerEvent::Replaced(item))?;
        *last = frame_number;
        trace!(surface = %self.shared.surface, frame_number, "frame replaced");
        Ok(())
    }

    /// Sideband stream attached or changed; content no longer comes from
    /// queued buffers.
    pub fn on_sideband_stream_changed(&self) {
        self.shared.sideband_changed.store(true, Ordering::Release);
        self.shared.wake.notify_one();
    }

    fn check_quarantine(&self) -> Result<(), ContractError> {
        if self.shared.metrics.is_quarantined() {
            return Err(self.refuse(ContractError::FrameQueueQuarantined {
                surface: self.shared.surface,
            }));
        }
        Ok(())
    }

    fn check_order(&self, last: u64, got: u64) -> Result<(), ContractError> {
        if got == 1 || got == last + 1 {
            return Ok(());
        }
        Err(self.refuse(ContractError::FrameOutOfOrder {
            surface: self.shared.surface,
            expected: last + 1,
            got,
        }))
    }

    fn send(&self, event: ProducerEvent) -> Result<(), ContractError> {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.shared.wake.notify_one();
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(self.refuse(ContractError::FrameQueueFull {
                surface: self.shared.surface,
                capacity: self.shared.capacity,
            })),
            Err(TrySendError::Closed(_)) => Err(self.refuse(ContractError::FrameQueueClosed {
                surface: self.shared.surface,
            })),
        }
    }

    fn refuse(&self, err: ContractError) -> ContractError {
        self.shared.metrics.inc_refused_count();
        metrics::counter!("framesched_frames_refused_total").increment(1);
        warn!(surface = %self.shared.surface, error = %err, "producer frame refused");
        err
    }
}

/// Coordinator side of a surface's frame queue.
#[derive(Debug)]
pub struct FrameConsumer {
    rx: Receiver<ProducerEvent>,
    shared: Arc<QueueShared>,
}

impl FrameConsumer {
    pub fn surface(&self) -> SurfaceId {
        self.shared.surface
    }

    pub fn metrics(&self) -> &Arc<FrameQueueMetrics> {
        &self.shared.metrics
    }

    /// Sideband change waiting to be latched.
    pub fn sideband_pending(&self) -> bool {
        self.shared.sideband_changed.load(Ordering::Acquire)
    }

    /// Consume the sideband-changed flag.
    pub fn take_sideband_changed(&self) -> bool {
        self.shared.sideband_changed.swap(false, Ordering::AcqRel)
    }

    /// Move every pending producer event into `queue`.
    pub fn drain_into(&self, queue: &mut VecDeque<BufferItem>) {
        while let Ok(event) = self.rx.try_recv() {
            match event {
                ProducerEvent::Available(item) => queue.push_back(item),
                ProducerEvent::Replaced(item) => match queue.back_mut() {
                    Some(back) => {
                        *back = item;
                        self.shared.metrics.add_dropped_count(1);
                    }
                    None => {
                        let err = ContractError::EmptyFrameQueue {
                            surface: self.shared.surface,
                        };
                        error!(surface = %self.shared.surface, error = %err, "frame replacement dropped");
                    }
                },
            }
        }
    }

    /// Items left the queue (latched or dropped).
    pub fn release(&self, n: usize) {
        self.shared.metrics.release(n);
    }

    /// Closes the channel; further producer calls fail with
    /// `FrameQueueClosed`.
    pub fn close(&self) {
        self.rx.close();
    }
}

impl Drop for FrameConsumer {
    fn drop(&mut self) {
        self.rx.close();
    }
}
