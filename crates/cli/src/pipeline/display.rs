//! Simulated display hardware: vsync timeline, present fences, composer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use contracts::{
    Clock, CompositionResult, Composer, ContractError, DisplayFrame, FenceTime, LayerStackId,
    Nsecs, Scene, VsyncControl,
};
use observability::FrameMetricsAggregator;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scheduler::HwVsyncController;
use tracing::{debug, trace};

/// Panel with a fixed refresh timeline.
///
/// Frames handed to it present at its next vsync; their fences signal when
/// the hardware vsync thread reaches that edge.
pub struct SimulatedDisplay {
    layer_stack: LayerStackId,
    clock: Arc<dyn Clock>,
    epoch: Nsecs,
    period: Nsecs,
    vsync_enabled: AtomicBool,
    vsync_toggles: AtomicU64,
    pending_presents: Mutex<Vec<FenceTime>>,
}

impl SimulatedDisplay {
    pub fn new(layer_stack: LayerStackId, clock: Arc<dyn Clock>, period: Nsecs) -> Self {
        Self {
            layer_stack,
            epoch: clock.now(),
            clock,
            period: period.max(1),
            vsync_enabled: AtomicBool::new(false),
            vsync_toggles: AtomicU64::new(0),
            pending_presents: Mutex::new(Vec::new()),
        }
    }

    /// First hardware vsync strictly after `t`.
    pub fn next_vsync_after(&self, t: Nsecs) -> Nsecs {
        let n = (t - self.epoch).div_euclid(self.period) + 1;
        self.epoch + n * self.period
    }

    pub fn is_vsync_enabled(&self) -> bool {
        self.vsync_enabled.load(Ordering::Acquire)
    }

    pub fn vsync_toggles(&self) -> u64 {
        self.vsync_toggles.load(Ordering::Relaxed)
    }

    /// Hand a composed frame to the panel; returns its present fence.
    pub fn queue_present(&self) -> FenceTime {
        let fence = FenceTime::pending();
        self.pending_presents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fence.clone());
        fence
    }

    /// Scan-out reached `when`: every queued frame is now on the glass.
    fn present_all(&self, when: Nsecs) -> usize {
        let fences = std::mem::take(
            &mut *self
                .pending_presents
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for fence in &fences {
            fence.signal(when);
        }
        fences.len()
    }
}

impl VsyncControl for SimulatedDisplay {
    fn set_vsync_enabled(&self, display: LayerStackId, enabled: bool) {
        if display != self.layer_stack {
            return;
        }
        if self.vsync_enabled.swap(enabled, Ordering::AcqRel) != enabled {
            self.vsync_toggles.fetch_add(1, Ordering::Relaxed);
            let display_id = display;
            debug!(display = %display_id, enabled, "simulated hardware vsync toggled");
        }
    }
}

/// Start the hardware vsync thread.
///
/// Each edge presents pending frames; while hardware vsync is enabled the
/// (jittered) timestamp is also reported to `hw_vsync`. Returns the number
/// of reported events when `stop` is set.
pub fn spawn_hw_vsync(
    display: Arc<SimulatedDisplay>,
    hw_vsync: Arc<HwVsyncController>,
    jitter_ns: Nsecs,
    seed: u64,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<u64>> {
    std::thread::Builder::new()
        .name("hw-vsync".to_string())
        .spawn(move || {
            let mut rng = StdRng::seed_from_u64(seed);
            let jitter = jitter_ns.max(0);
            let mut reported = 0u64;
            while !stop.load(Ordering::Acquire) {
                let now = display.clock.now();
                let edge = display.next_vsync_after(now);
                std::thread::sleep(Duration::from_nanos((edge - now).max(0) as u64));

                display.present_all(edge);
                if display.is_vsync_enabled() {
                    let timestamp = edge + rng.random_range(-jitter..=jitter);
                    hw_vsync.on_hardware_vsync(display.layer_stack, timestamp);
                    reported += 1;
                    trace!(timestamp, "hardware vsync reported");
                }
            }
            reported
        })
}

/// Composer that hands every frame to the simulated panel.
pub struct SimulatedComposer {
    display: Arc<SimulatedDisplay>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Mutex<FrameMetricsAggregator>>,
    frames: u64,
    recomposed: u64,
}

impl SimulatedComposer {
    pub fn new(
        display: Arc<SimulatedDisplay>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Mutex<FrameMetricsAggregator>>,
    ) -> Self {
        Self {
            display,
            clock,
            metrics,
            frames: 0,
            recomposed: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames that had a non-empty dirty region.
    pub fn recomposed(&self) -> u64 {
        self.recomposed
    }
}

impl Composer for SimulatedComposer {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn begin_frame(
        &mut self,
        frame: &DisplayFrame,
        must_recompose: bool,
    ) -> Result<(), ContractError> {
        if must_recompose {
            self.recomposed += 1;
        }
        trace!(
            display = %frame.layer_stack,
            layers = frame.visible_layers.len(),
            must_recompose,
            "begin frame"
        );
        Ok(())
    }

    async fn compose(
        &mut self,
        frame: &DisplayFrame,
        _scene: &Scene,
    ) -> Result<CompositionResult, ContractError> {
        self.frames += 1;
        if frame.layer_stack != self.display.layer_stack {
            // secondary panels are not modelled; their frames present at once
            return Ok(CompositionResult {
                present_fence: FenceTime::signaled(self.clock.now()),
                client_composition: false,
            });
        }

        let composite_time = self.clock.now();
        let present_at = self.display.next_vsync_after(composite_time);
        {
            let mut metrics = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
            metrics.observe_present(present_at);
            metrics.observe_present_latency(present_at - composite_time);
        }
        observability::record_present_latency_ns(present_at - composite_time);

        Ok(CompositionResult {
            present_fence: self.display.queue_present(),
            client_composition: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::ManualClock;

    const PERIOD: Nsecs = 16_666_667;

    #[test]
    fn test_next_vsync_after_is_strict() {
        let clock = ManualClock::new(1_000);
        let display = SimulatedDisplay::new(LayerStackId(0), Arc::new(clock), PERIOD);
        assert_eq!(display.next_vsync_after(1_000), 1_000 + PERIOD);
        assert_eq!(display.next_vsync_after(1_000 + PERIOD - 1), 1_000 + PERIOD);
        assert_eq!(display.next_vsync_after(1_000 + PERIOD), 1_000 + 2 * PERIOD);
    }

    #[test]
    fn test_present_signals_pending_fences() {
        let clock = ManualClock::new(0);
        let display = SimulatedDisplay::new(LayerStackId(0), Arc::new(clock), PERIOD);
        let fence = display.queue_present();
        assert!(fence.is_pending());
        assert_eq!(display.present_all(PERIOD), 1);
        assert_eq!(fence.signal_time(), Some(PERIOD));
        assert_eq!(display.present_all(2 * PERIOD), 0);
    }

    #[test]
    fn test_vsync_toggles_counted_for_own_display() {
        let clock = ManualClock::new(0);
        let display = SimulatedDisplay::new(LayerStackId(0), Arc::new(clock), PERIOD);
        display.set_vsync_enabled(LayerStackId(0), true);
        display.set_vsync_enabled(LayerStackId(0), true);
        display.set_vsync_enabled(LayerStackId(1), false);
        assert!(display.is_vsync_enabled());
        assert_eq!(display.vsync_toggles(), 1);
    }
}
