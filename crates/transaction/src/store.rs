//! TransactionStore - client mutations in, committed scene snapshots out

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use contracts::{
    ContractError, DisplayState, FrameQueueConfig, LayerState, Scene, SubmitOutcome, SurfaceId,
    Transaction, TransactionConfig, TransactionNeeded,
};
use frame_sync::{frame_channel, Deferral, FrameProducer, SyncCoordinator};
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

use crate::commit_buffer::CommitBuffer;
use crate::state::{CurrentState, Gate, LayerRecord, PendingState};

/// What a commit changed.
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    pub generation: u64,
    /// Surfaces whose drawing state changed
    pub applied: Vec<SurfaceId>,
    pub added: Vec<SurfaceId>,
    pub removed: Vec<SurfaceId>,
    /// Visible regions must be recomputed
    pub visible_regions_dirty: bool,
    /// Surfaces whose content must be fully repainted
    pub content_dirty: BTreeSet<SurfaceId>,
    pub displays_changed: bool,
    /// Some pending state is still gated; commit again on a later tick
    pub pending_remaining: bool,
}

/// Commit bookkeeping shared with blocked submitters.
#[derive(Debug, Default)]
struct CommitSignal {
    generation: u64,
    animation_pending: bool,
}

/// Current/drawing scene with a pending-state FIFO per surface.
pub struct TransactionStore {
    buffer: CommitBuffer<CurrentState, Scene>,
    signal: Mutex<CommitSignal>,
    committed: Condvar,
    next_id: AtomicU64,
    config: TransactionConfig,
    frame_queue: FrameQueueConfig,
    wake: Arc<Notify>,
}

impl TransactionStore {
    /// `wake` is notified whenever a commit is needed; the same handle is
    /// given to every frame queue.
    pub fn new(config: &TransactionConfig, frame_queue: &FrameQueueConfig, wake: Arc<Notify>) -> Self {
        Self {
            buffer: CommitBuffer::new(CurrentState::default(), Scene::new()),
            signal: Mutex::new(CommitSignal::default()),
            committed: Condvar::new(),
            next_id: AtomicU64::new(1),
            config: config.clone(),
            frame_queue: frame_queue.clone(),
            wake,
        }
    }

    fn signal(&self) -> MutexGuard<'_, CommitSignal> {
        self.signal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.config.sync_timeout_ms)
    }

    /// Latest committed (drawing) scene.
    pub fn drawing(&self) -> Arc<Scene> {
        self.buffer.read()
    }

    pub fn generation(&self) -> u64 {
        self.buffer.generation()
    }

    pub fn needs_commit(&self) -> bool {
        self.buffer.stage(|current| current.needs_commit())
    }

    pub fn layer_count(&self) -> usize {
        self.buffer.stage(|current| current.layer_count())
    }

    /// Current (not yet committed) state of a surface.
    pub fn current_state(&self, id: SurfaceId) -> Option<LayerState> {
        self.buffer
            .stage(|current| current.layers.get(&id).map(|r| r.state.clone()))
    }

    /// Register a display; its state is committed with the next transaction.
    pub fn add_display(&self, display: DisplayState) {
        self.buffer.stage(|current| {
            let (layer_stack, name) = (&display.layer_stack, &display.name);
            info!(layer_stack = %layer_stack, name = %name, "display added");
            current.displays.insert(display.layer_stack, display);
            current.needed.display = true;
        });
        self.wake.notify_one();
    }

    /// Create a surface; `state.parent` must name a live surface.
    #[instrument(name = "create_surface", skip(self, state), fields(name = %state.name))]
    pub fn create_surface(&self, state: LayerState) -> Result<(SurfaceId, FrameProducer), ContractError> {
        let producer = self.buffer.stage(|current| {
            let count = current.layer_count();
            if count >= self.config.max_layers {
                return Err(ContractError::LayerLimit {
                    count,
                    max: self.config.max_layers,
                });
            }
            if let Some(parent) = state.parent {
                if !current.contains(parent) {
                    return Err(ContractError::surface_not_found(parent));
                }
            }

            let id = SurfaceId(self.next_id.fetch_add(1, Ordering::Relaxed));
            let (producer, consumer) =
                frame_channel(id, self.frame_queue.capacity, Arc::clone(&self.wake));
            current.layers.insert(id, LayerRecord::new(state));
            current.added.push((id, consumer));
            current.needed.merge(TransactionNeeded {
                transaction: true,
                traversal: true,
                display: false,
            });
            Ok(producer)
        })?;

        let id = producer.surface();
        metrics::gauge!("framesched_surfaces").increment(1.0);
        debug!(surface = %id, "surface created");
        self.wake.notify_one();
        Ok((id, producer))
    }

    /// Remove a surface and all of its descendants.
    #[instrument(name = "remove_surface", skip(self))]
    pub fn remove_surface(&self, id: SurfaceId) -> Result<(), ContractError> {
        let removed = self.buffer.stage(|current| {
            if !current.contains(id) {
                return Err(ContractError::surface_not_found(id));
            }
            let subtree = current.subtree(id);
            for surface in &subtree {
                if let Some(mut record) = current.layers.remove(surface) {
                    // nothing may keep waiting on a dead surface's transactions
                    record.release_remote_points();
                }
                current.added.retain(|(added, _)| added != surface);
            }
            current.removed.extend(subtree.iter().copied());
            current.needed.merge(TransactionNeeded {
                transaction: true,
                traversal: true,
                display: false,
            });
            Ok(subtree.len())
        })?;

        metrics::gauge!("framesched_surfaces").decrement(removed as f64);
        debug!(surface = %id, removed, "surface removed");
        self.wake.notify_one();
        Ok(())
    }

    /// Merge a transaction into the current state.
    ///
    /// Synchronous and animation transactions block until the next commit,
    /// bounded by the configured timeout.
    #[instrument(
        name = "transaction_submit",
        skip(self, transaction),
        fields(
            layer_changes = transaction.layer_changes.len(),
            synchronous = transaction.flags.synchronous,
            animation = transaction.flags.animation,
        )
    )]
    pub fn submit(&self, transaction: Transaction) -> SubmitOutcome {
        let flags = transaction.flags;
        let wait_for_commit = flags.synchronous || flags.animation;

        if flags.animation {
            self.wait_for_previous_animation();
        }

        let (needed, observed) = self.buffer.stage(|current| {
            let mut needed = TransactionNeeded::NONE;
            for (id, change) in transaction.layer_changes {
                match current.layers.get(&id) {
                    None => {
                        warn!(surface = %id, "layer change for unknown surface ignored");
                        continue;
                    }
                    Some(record) if record.detached => {
                        debug!(surface = %id, "layer change for detached surface ignored");
                        continue;
                    }
                    Some(_) => {}
                }
                needed.merge(current.apply_layer_change(id, change));
            }
            for (layer_stack, change) in transaction.display_changes {
                needed.merge(current.apply_display_change(layer_stack, change));
            }

            // An empty blocking transaction still forces a commit (flush)
            if wait_for_commit && !needed.any() {
                needed.transaction = true;
            }
            current.needed.merge(needed);
            (needed, self.buffer.generation())
        });

        metrics::counter!("framesched_transactions_total").increment(1);
        if needed.any() {
            self.wake.notify_one();
        }

        if !wait_for_commit {
            return SubmitOutcome::Queued;
        }

        let signal = self.signal();
        let (signal, result) = self
            .committed
            .wait_timeout_while(signal, self.sync_timeout(), |s| s.generation <= observed)
            .unwrap_or_else(PoisonError::into_inner);
        drop(signal);

        if result.timed_out() {
            warn!(
                timeout_ms = self.config.sync_timeout_ms,
                "synchronous transaction timed out waiting for commit"
            );
            metrics::counter!("framesched_transaction_timeouts_total").increment(1);
            SubmitOutcome::TimedOut
        } else {
            SubmitOutcome::Committed
        }
    }

    fn wait_for_previous_animation(&self) {
        let signal = self.signal();
        let (mut signal, result) = self
            .committed
            .wait_timeout_while(signal, self.sync_timeout(), |s| s.animation_pending)
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() {
            warn!("animation transaction timed out waiting for the previous one");
        }
        signal.animation_pending = true;
    }

    /// Apply pending states to the drawing scene. Main context only.
    #[instrument(name = "transaction_commit", skip(self, coordinator))]
    pub fn commit(&self, coordinator: &mut SyncCoordinator) -> CommitOutcome {
        let mut outcome = CommitOutcome::default();

        let generation = self.buffer.commit_with(|current, drawing| {
            let needed = std::mem::take(&mut current.needed);
            let mut next = drawing.clone();

            for (id, consumer) in current.added.drain(..) {
                coordinator.register(consumer);
                outcome.added.push(id);
                outcome.visible_regions_dirty = true;
            }
            for id in current.removed.drain(..) {
                coordinator.unregister(id);
                next.layers.remove(&id);
                outcome.removed.push(id);
                outcome.visible_regions_dirty = true;
            }

            if needed.transaction || needed.traversal {
                commit_layers(current, &mut next, coordinator, &mut outcome);
            }
            if outcome.pending_remaining {
                current.needed.transaction = true;
            }

            if needed.display || next.displays != current.displays {
                if next.displays != current.displays {
                    outcome.displays_changed = true;
                    outcome.visible_regions_dirty = true;
                }
                next.displays = current.displays.clone();
            }
            next
        });
        outcome.generation = generation;

        // release blocked submitters
        {
            let mut signal = self.signal();
            signal.generation = generation;
            signal.animation_pending = false;
            self.committed.notify_all();
        }

        metrics::counter!("framesched_commits_total").increment(1);
        debug!(
            generation,
            applied = outcome.applied.len(),
            added = outcome.added.len(),
            removed = outcome.removed.len(),
            visible_regions_dirty = outcome.visible_regions_dirty,
            "transaction committed"
        );
        outcome
    }
}

/// Resolve barriers, drain each surface's FIFO and fold the result into
/// `next`.
fn commit_layers(
    current: &mut CurrentState,
    next: &mut Scene,
    coordinator: &mut SyncCoordinator,
    outcome: &mut CommitOutcome,
) {
    let live: BTreeSet<SurfaceId> = current.layers.keys().copied().collect();
    let mut hidden = Vec::new();
    let mut applied_states: BTreeMap<SurfaceId, LayerState> = BTreeMap::new();

    for (id, record) in current.layers.iter_mut() {
        if record.modified {
            record.pending.push_back(PendingState {
                state: record.state.clone(),
                gate: Gate::Open,
            });
            record.modified = false;
        }
        if record.pending.is_empty() {
            continue;
        }

        for entry in record.pending.iter_mut() {
            if let Gate::Unresolved {
                barrier,
                frame_number,
            } = entry.gate
            {
                entry.gate = if !live.contains(&barrier) {
                    warn!(
                        surface = %id,
                        barrier = %barrier,
                        frame_number,
                        "deferred transaction barrier is gone, applying"
                    );
                    Gate::Open
                } else {
                    match coordinator.defer_until(barrier, frame_number) {
                        Deferral::Immediate => Gate::Open,
                        Deferral::Pending(point) => Gate::Waiting { barrier, point },
                    }
                };
            }
        }

        let mut applied = None;
        while let Some(front) = record.pending.front() {
            if let Gate::Waiting { barrier, point } = &front.gate {
                if !point.frame_is_available() {
                    debug!(
                        surface = %id,
                        barrier = %barrier,
                        frame = point.frame_number(),
                        "pending state waiting on barrier frame"
                    );
                    break;
                }
                point.set_transaction_applied();
            }
            applied = record.pending.pop_front().map(|entry| entry.state);
        }
        if !record.pending.is_empty() {
            outcome.pending_remaining = true;
        }

        if let Some(state) = applied {
            if state.flags.hidden {
                hidden.push(*id);
            }
            applied_states.insert(*id, state);
        }
    }

    for (id, state) in applied_states {
        match next.layers.get(&id) {
            None => {
                outcome.visible_regions_dirty = true;
                outcome.content_dirty.insert(id);
            }
            Some(old) => {
                if old.size != state.size {
                    outcome.visible_regions_dirty = true;
                }
                if old.sequence != state.sequence {
                    outcome.visible_regions_dirty = true;
                    outcome.content_dirty.insert(id);
                }
            }
        }
        next.layers.insert(id, state);
        outcome.applied.push(id);
    }

    // Hidden surfaces must not hold up transactions waiting on their frames
    for id in hidden {
        for surface in next.subtree(id) {
            coordinator.clear_sync_points(surface);
        }
    }
}
