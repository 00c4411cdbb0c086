//! RefreshScheduler - one tick per vsync: commit, latch, compose

use std::future::Future;
use std::sync::Arc;

use contracts::{
    Clock, CompositionResult, Composer, CompositorConfig, ContentAcquirer, DisplayChange,
    DisplayFrame, DisplayState, FenceTime, LayerStackId, Nsecs, Scene, SubmitOutcome, SurfaceId,
    Transaction, VsyncControl,
};
use frame_sync::{LatchOutcome, SyncCoordinator};
use regions::RegionCompositor;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, instrument, trace, warn};
use transaction::TransactionStore;
use vsync::{VsyncCallback, VsyncModel};

use crate::app_vsync::AppVsyncSource;
use crate::error::SchedulerError;
use crate::event_source::VsyncEventSource;
use crate::histogram::FrameHistogram;
use crate::hw_vsync::HwVsyncController;
use crate::timing::{CompositorTiming, CompositorTimingTracker};

const VSYNC_CHANNEL_CAPACITY: usize = 4;
const APP_VSYNC_CAPACITY: usize = 16;
const SF_LISTENER: &str = "sf";
const APP_LISTENER: &str = "app";

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing committed or latched
    Idle,
    /// Previous GPU-composed frame has not presented; tick skipped
    Backpressure,
    Refreshed,
}

/// Counters over the scheduler's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub refreshes: u64,
    pub commits: u64,
    pub latched_frames: u64,
    pub missed_frames: u64,
    pub backpressure_skips: u64,
    pub compositions: u64,
    pub compose_errors: u64,
    pub region_passes: u64,
    /// Latch attempts refused because the surface is quarantined
    pub quarantined_latches: u64,
}

/// Drives the frame pipeline from the main context.
///
/// Owns the coordinator, the region compositor and the composer. Clients
/// reach it through the shared [`TransactionStore`], producers through
/// their frame queues, the hardware through [`HwVsyncController`].
pub struct RefreshScheduler<C> {
    config: CompositorConfig,
    clock: Arc<dyn Clock>,
    model: Arc<VsyncModel>,
    hw_vsync: Arc<HwVsyncController>,
    store: Arc<TransactionStore>,
    events: Arc<VsyncEventSource>,
    app_vsync: Arc<AppVsyncSource>,
    vsync_rx: mpsc::Receiver<Nsecs>,
    wake: Arc<Notify>,
    coordinator: SyncCoordinator,
    regions: RegionCompositor,
    composer: C,
    acquirer: Box<dyn ContentAcquirer>,
    repaint_everything: bool,
    had_client_composition: bool,
    previous_present: FenceTime,
    timing: CompositorTimingTracker,
    histogram: FrameHistogram,
    stats: SchedulerStats,
}

impl<C: Composer> RefreshScheduler<C> {
    /// Build the pipeline for `config`: vsync model and dispatcher, hardware
    /// vsync policy, transaction store with every configured display.
    pub fn new(
        config: &CompositorConfig,
        clock: Arc<dyn Clock>,
        control: Arc<dyn VsyncControl>,
        composer: C,
        acquirer: Box<dyn ContentAcquirer>,
    ) -> Result<Self, SchedulerError> {
        let primary = config.primary_display().ok_or(SchedulerError::NoDisplay)?;
        let period = primary.period_ns();

        let model = Arc::new(VsyncModel::new(&config.vsync, Arc::clone(&clock))?);
        model.set_period(period);
        let hw_vsync = Arc::new(HwVsyncController::new(
            Arc::clone(&model),
            control,
            Arc::clone(&clock),
            primary.layer_stack,
            period,
            config.vsync.resync_rate_limit_ms,
        ));

        let wake = Arc::new(Notify::new());
        let store = Arc::new(TransactionStore::new(
            &config.transaction,
            &config.frame_queue,
            Arc::clone(&wake),
        ));
        for display in &config.displays {
            store.add_display(DisplayState::new(
                display.layer_stack,
                display.name.as_str(),
                display.width,
                display.height,
            ));
        }

        let (events, vsync_rx) = VsyncEventSource::channel(VSYNC_CHANNEL_CAPACITY);
        let callback: Arc<dyn VsyncCallback> = events.clone();
        model.add_event_listener(SF_LISTENER, config.vsync.sf_phase_offset_ns, callback)?;
        let app_vsync = AppVsyncSource::new(Arc::clone(&hw_vsync), APP_VSYNC_CAPACITY);
        let app_callback: Arc<dyn VsyncCallback> = app_vsync.clone();
        model.add_event_listener(APP_LISTENER, config.vsync.app_phase_offset_ns, app_callback)?;

        hw_vsync.resync_to_hardware_vsync(true);
        events.request_next_vsync();

        info!(
            displays = config.displays.len(),
            period,
            composer = composer.name(),
            "refresh scheduler created"
        );

        Ok(Self {
            clock,
            model,
            hw_vsync,
            store,
            events,
            app_vsync,
            vsync_rx,
            wake,
            coordinator: SyncCoordinator::new(&config.frame_queue),
            regions: RegionCompositor::new(),
            composer,
            acquirer,
            repaint_everything: false,
            had_client_composition: false,
            previous_present: FenceTime::invalid(),
            timing: CompositorTimingTracker::new(
                config.scheduler.compositor_timing_samples,
                config.vsync.sf_phase_offset_ns,
            ),
            histogram: FrameHistogram::new(),
            stats: SchedulerStats::default(),
            config: config.clone(),
        })
    }

    pub fn store(&self) -> &Arc<TransactionStore> {
        &self.store
    }

    pub fn model(&self) -> &Arc<VsyncModel> {
        &self.model
    }

    pub fn hw_vsync(&self) -> &Arc<HwVsyncController> {
        &self.hw_vsync
    }

    /// Vsync events for clients at the app phase offset.
    pub fn app_vsync(&self) -> &Arc<AppVsyncSource> {
        &self.app_vsync
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    pub fn regions(&self) -> &RegionCompositor {
        &self.regions
    }

    pub fn composer(&self) -> &C {
        &self.composer
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn compositor_timing(&self) -> CompositorTiming {
        self.timing.timing()
    }

    pub fn histogram(&self) -> &FrameHistogram {
        &self.histogram
    }

    pub fn is_vsync_requested(&self) -> bool {
        self.events.is_requested()
    }

    /// Schedule a tick on the next vsync.
    pub fn request_next_vsync(&self) {
        self.events.request_next_vsync();
    }

    /// Publish one vsync every `1 + count` refreshes.
    pub fn set_refresh_skip_count(&self, count: u32) {
        info!(count, "refresh skip count changed");
        self.model.set_refresh_skip_count(count);
    }

    /// Repaint every display in full on the next tick.
    pub fn repaint_everything(&mut self) {
        self.repaint_everything = true;
        self.request_next_vsync();
    }

    /// Lift a surface's quarantine so that it may latch again.
    pub fn reset_quarantine(&mut self, id: SurfaceId) -> bool {
        let reset = self.coordinator.reset_quarantine(id);
        if reset {
            self.request_next_vsync();
        }
        reset
    }

    /// Power a display on or off. The primary display also gates hardware
    /// vsync.
    pub fn set_display_power(&mut self, layer_stack: LayerStackId, powered_off: bool) -> SubmitOutcome {
        let outcome = self.store.submit(
            Transaction::new().display(layer_stack, DisplayChange::PowerMode { powered_off }),
        );
        if layer_stack == self.hw_vsync.display() {
            if powered_off {
                self.hw_vsync.disable(true);
                self.histogram.mark_powered_off();
            } else {
                self.hw_vsync.resync_to_hardware_vsync(true);
                self.repaint_everything = true;
            }
        }
        info!(display = %layer_stack, powered_off, "display power changed");
        self.request_next_vsync();
        outcome
    }

    /// Process vsync events until `shutdown` resolves.
    ///
    /// Any wake-up (new frame, transaction, display change) requests the
    /// next vsync; the tick itself runs when that vsync arrives.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), SchedulerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let wake = Arc::clone(&self.wake);
        info!("refresh scheduler running");
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                event = self.vsync_rx.recv() => match event {
                    Some(vsync_time) => {
                        self.on_vsync(vsync_time).await;
                    }
                    None => return Err(SchedulerError::VsyncChannelClosed),
                },
                () = wake.notified() => self.request_next_vsync(),
            }
        }
        info!(ticks = self.stats.ticks, refreshes = self.stats.refreshes, "refresh scheduler stopped");
        Ok(())
    }

    /// Stop hardware vsync and the dispatch thread.
    pub fn stop(&self) {
        self.hw_vsync.disable(true);
        self.model.stop();
    }

    /// One tick: invalidate, then refresh if anything changed.
    #[instrument(name = "scheduler_tick", skip(self), fields(tick = self.stats.ticks + 1))]
    pub async fn on_vsync(&mut self, vsync_time: Nsecs) -> TickOutcome {
        self.stats.ticks += 1;

        let frame_missed = !self.had_client_composition && self.previous_present.is_pending();
        if frame_missed {
            self.stats.missed_frames += 1;
            metrics::counter!("framesched_missed_frames_total").increment(1);
            if self.config.scheduler.propagate_backpressure {
                self.stats.backpressure_skips += 1;
                debug!(vsync_time, "previous frame not presented, skipping tick");
                self.request_next_vsync();
                return TickOutcome::Backpressure;
            }
        }

        let committed = self.handle_transaction();
        let latched = self.handle_page_flip();
        let refresh = committed | latched | self.repaint_everything;
        if !refresh {
            trace!(vsync_time, "nothing to refresh");
            return TickOutcome::Idle;
        }
        self.on_refresh().await;
        TickOutcome::Refreshed
    }

    fn handle_transaction(&mut self) -> bool {
        if !self.store.needs_commit() {
            return false;
        }
        self.coordinator.notify_available_frames();
        let outcome = self.store.commit(&mut self.coordinator);
        self.stats.commits += 1;

        if outcome.visible_regions_dirty || !outcome.content_dirty.is_empty() {
            self.regions.invalidate();
        }
        self.regions.mark_content_dirty(outcome.content_dirty.iter().copied());
        if outcome.pending_remaining {
            self.request_next_vsync();
        }
        true
    }

    fn handle_page_flip(&mut self) -> bool {
        let expected_present = self.model.compute_next_refresh(0);
        let scene = self.store.drawing();
        let mut frame_queued = false;
        let mut latched_any = false;

        for id in self.coordinator.surface_ids() {
            if !self.coordinator.has_queued_frame(id) {
                continue;
            }
            frame_queued = true;
            if !self.coordinator.should_present_now(id, expected_present) {
                continue;
            }
            match self.coordinator.latch(id, expected_present, self.acquirer.as_mut()) {
                LatchOutcome::Latched {
                    recompute_visible_regions,
                    ..
                } => {
                    latched_any = true;
                    self.stats.latched_frames += 1;
                    if recompute_visible_regions {
                        self.regions.invalidate();
                        self.regions.mark_content_dirty([id]);
                    } else {
                        self.regions.invalidate_surface(&scene, id);
                    }
                }
                LatchOutcome::Sideband => {
                    latched_any = true;
                    self.regions.invalidate();
                    self.regions.mark_content_dirty([id]);
                }
                LatchOutcome::Quarantined => {
                    // the producer is refused from now on; nothing to retry
                    self.stats.quarantined_latches += 1;
                    warn!(surface = %id, "surface quarantined, frames not latched");
                }
                outcome if outcome.needs_retry() => self.request_next_vsync(),
                _ => {}
            }
        }

        if frame_queued && !latched_any {
            self.request_next_vsync();
        }
        latched_any
    }

    async fn on_refresh(&mut self) {
        let refresh_start = self.clock.now();
        self.stats.refreshes += 1;

        if self.coordinator.pre_composition() {
            self.request_next_vsync();
        }

        let scene = self.store.drawing();
        if self.regions.rebuild(&scene, &self.coordinator) {
            self.stats.region_passes += 1;
        }
        if std::mem::take(&mut self.repaint_everything) {
            self.regions.repaint_everything(&scene);
        }

        let primary = self.hw_vsync.display();
        let primary_on = scene.displays.get(&primary).is_some_and(|d| !d.powered_off);
        let frames: Vec<DisplayFrame> = self.regions.frames().values().cloned().collect();
        let mut client_composition = false;
        let mut primary_present = FenceTime::invalid();

        for frame in &frames {
            let powered_off = scene
                .displays
                .get(&frame.layer_stack)
                .is_none_or(|d| d.powered_off);
            if powered_off {
                continue;
            }
            match self.compose_display(frame, &scene).await {
                Ok(result) => {
                    self.stats.compositions += 1;
                    client_composition |= result.client_composition;
                    if frame.layer_stack == primary {
                        primary_present = result.present_fence;
                    }
                }
                Err(err) => {
                    self.stats.compose_errors += 1;
                    metrics::counter!("framesched_compose_errors_total").increment(1);
                    error!(error = %err, "display composition failed");
                }
            }
            self.regions.finish_frame(frame.layer_stack);
        }

        self.had_client_composition = client_composition;
        self.post_composition(refresh_start, primary_present, primary_on);
    }

    async fn compose_display(
        &mut self,
        frame: &DisplayFrame,
        scene: &Scene,
    ) -> Result<CompositionResult, SchedulerError> {
        let must_recompose = !frame.dirty.is_empty();
        self.composer
            .begin_frame(frame, must_recompose)
            .await
            .map_err(|e| SchedulerError::compose(frame.name.as_str(), e))?;
        self.composer
            .compose(frame, scene)
            .await
            .map_err(|e| SchedulerError::compose(frame.name.as_str(), e))
    }

    fn post_composition(&mut self, refresh_start: Nsecs, present: FenceTime, primary_on: bool) {
        if primary_on {
            self.hw_vsync.add_present_fence(present.clone());
        }

        let vsync_phase = self.model.compute_next_refresh(0);
        let interval = self.model.period();
        let timing = self
            .timing
            .update(vsync_phase, interval, refresh_start, present.clone());

        if primary_on {
            self.histogram.record(self.clock.now(), interval);
        } else {
            self.histogram.mark_powered_off();
        }
        self.previous_present = present;
        trace!(
            deadline = timing.deadline,
            present_latency = timing.present_latency,
            "composition finished"
        );
    }
}
