//! Hardware vsync on/off policy for the primary display

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use contracts::{Clock, FenceTime, LayerStackId, Nsecs, VsyncControl, NSECS_PER_MS};
use tracing::{debug, trace};
use vsync::VsyncModel;

#[derive(Debug)]
struct HwVsyncState {
    enabled: bool,
    /// Cleared while the display is off; resyncs are refused until restored
    available: bool,
    period: Nsecs,
    last_resync_attempt: Option<Nsecs>,
}

/// Turns hardware vsync on while the model needs samples and off once it
/// has locked.
///
/// Shared between the hardware vsync thread and the main context.
pub struct HwVsyncController {
    model: Arc<VsyncModel>,
    control: Arc<dyn VsyncControl>,
    clock: Arc<dyn Clock>,
    display: LayerStackId,
    rate_limit: Nsecs,
    state: Mutex<HwVsyncState>,
}

impl HwVsyncController {
    pub fn new(
        model: Arc<VsyncModel>,
        control: Arc<dyn VsyncControl>,
        clock: Arc<dyn Clock>,
        display: LayerStackId,
        period: Nsecs,
        resync_rate_limit_ms: u64,
    ) -> Self {
        Self {
            model,
            control,
            clock,
            display,
            rate_limit: resync_rate_limit_ms as Nsecs * NSECS_PER_MS,
            state: Mutex::new(HwVsyncState {
                enabled: false,
                available: false,
                period,
                last_resync_attempt: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, HwVsyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn display(&self) -> LayerStackId {
        self.display
    }

    pub fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    pub fn is_available(&self) -> bool {
        self.state().available
    }

    /// New nominal period (display mode change); applied at the next resync.
    pub fn set_period(&self, period: Nsecs) {
        self.state().period = period;
    }

    // `set_vsync_enabled` is called with the state lock held and must not
    // block.
    fn enable_locked(&self, state: &mut HwVsyncState) {
        if !state.enabled && state.available {
            self.model.begin_resync();
            self.control.set_vsync_enabled(self.display, true);
            state.enabled = true;
            debug!(display = %self.display, "hardware vsync enabled");
        }
    }

    fn disable_locked(&self, state: &mut HwVsyncState, make_unavailable: bool) {
        if state.enabled {
            self.control.set_vsync_enabled(self.display, false);
            state.enabled = false;
            debug!(display = %self.display, "hardware vsync disabled");
        }
        if make_unavailable {
            state.available = false;
        }
    }

    pub fn enable(&self) {
        let mut state = self.state();
        self.enable_locked(&mut state);
    }

    /// Stop hardware vsync; `make_unavailable` also refuses later resyncs
    /// (display powered off).
    pub fn disable(&self, make_unavailable: bool) {
        let mut state = self.state();
        self.disable_locked(&mut state, make_unavailable);
    }

    /// One hardware vsync from `display`. Only the primary display's events
    /// feed the model, and only while enabled.
    pub fn on_hardware_vsync(&self, display: LayerStackId, timestamp: Nsecs) {
        if display != self.display {
            return;
        }
        let mut state = self.state();
        if !state.enabled {
            trace!(timestamp, "hardware vsync ignored while disabled");
            return;
        }
        if self.model.add_resync_sample(timestamp) {
            self.enable_locked(&mut state);
        } else {
            self.disable_locked(&mut state, false);
        }
    }

    /// Restart the model from the nominal period and collect fresh samples.
    ///
    /// `make_available` re-arms a controller disabled by power off.
    pub fn resync_to_hardware_vsync(&self, make_available: bool) {
        let mut state = self.state();
        if make_available {
            state.available = true;
        } else if !state.available {
            return;
        }
        self.model.reset();
        self.model.set_period(state.period);
        self.enable_locked(&mut state);
    }

    /// Resync unless the previous attempt was within the rate limit. Every
    /// call restarts the window.
    pub fn resync_with_rate_limit(&self) -> bool {
        let now = self.clock.now();
        let last = self.state().last_resync_attempt.replace(now);
        let due = last.is_none_or(|last| now - last > self.rate_limit);
        if due {
            self.resync_to_hardware_vsync(false);
        }
        due
    }

    /// Feed the latest present fence; re-enables hardware vsync when the
    /// fences drift from the model.
    pub fn add_present_fence(&self, fence: FenceTime) -> bool {
        if fence.state() == contracts::FenceState::Invalid {
            return false;
        }
        let mut state = self.state();
        let resync = self.model.add_present_fence(fence);
        if resync {
            self.enable_locked(&mut state);
        } else {
            self.disable_locked(&mut state, false);
        }
        resync
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ManualClock, VsyncConfig};

    const PERIOD: Nsecs = 16_666_667;
    const T0: Nsecs = 1_000_000_000;

    #[derive(Default)]
    struct RecordingControl(Mutex<Vec<bool>>);

    impl VsyncControl for RecordingControl {
        fn set_vsync_enabled(&self, _: LayerStackId, enabled: bool) {
            self.0.lock().unwrap().push(enabled);
        }
    }

    fn controller(clock: &ManualClock) -> (HwVsyncController, Arc<RecordingControl>, Arc<VsyncModel>) {
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let model = Arc::new(VsyncModel::new(&VsyncConfig::default(), Arc::clone(&clock)).unwrap());
        let control = Arc::new(RecordingControl::default());
        let hw = HwVsyncController::new(
            Arc::clone(&model),
            control.clone(),
            clock,
            LayerStackId(0),
            PERIOD,
            500,
        );
        (hw, control, model)
    }

    #[test]
    fn test_resync_enables_until_locked() {
        let clock = ManualClock::new(T0);
        let (hw, control, model) = controller(&clock);
        hw.on_hardware_vsync(LayerStackId(0), T0);
        assert!(control.0.lock().unwrap().is_empty(), "disabled controller must ignore samples");

        hw.resync_to_hardware_vsync(true);
        assert!(hw.is_enabled());
        for i in 0..8 {
            hw.on_hardware_vsync(LayerStackId(0), T0 + i * PERIOD);
        }
        assert!(!hw.is_enabled(), "locked model turns hardware vsync off");
        assert_eq!(*control.0.lock().unwrap(), vec![true, false]);
        assert!((model.period() - PERIOD).abs() <= 1);
        model.stop();
    }

    #[test]
    fn test_other_display_ignored() {
        let clock = ManualClock::new(T0);
        let (hw, _control, model) = controller(&clock);
        hw.resync_to_hardware_vsync(true);
        for i in 0..8 {
            hw.on_hardware_vsync(LayerStackId(5), T0 + i * PERIOD);
        }
        assert!(hw.is_enabled());
        assert!(model.snapshot().resync_samples.is_empty());
        model.stop();
    }

    #[test]
    fn test_rate_limit_window_restarts() {
        let clock = ManualClock::new(T0);
        let (hw, _control, model) = controller(&clock);
        hw.resync_to_hardware_vsync(true);
        hw.disable(false);

        assert!(hw.resync_with_rate_limit());
        clock.advance(400 * NSECS_PER_MS);
        assert!(!hw.resync_with_rate_limit(), "within 500 ms");
        clock.advance(400 * NSECS_PER_MS);
        assert!(!hw.resync_with_rate_limit(), "window restarts on every call");
        clock.advance(600 * NSECS_PER_MS);
        assert!(hw.resync_with_rate_limit());
        model.stop();
    }

    #[test]
    fn test_unavailable_refuses_resync() {
        let clock = ManualClock::new(T0);
        let (hw, control, model) = controller(&clock);
        hw.resync_to_hardware_vsync(true);
        hw.disable(true);
        hw.resync_to_hardware_vsync(false);
        assert!(!hw.is_enabled());
        assert_eq!(*control.0.lock().unwrap(), vec![true, false]);
        model.stop();
    }

    #[test]
    fn test_invalid_present_fence_ignored() {
        let clock = ManualClock::new(T0);
        let (hw, control, model) = controller(&clock);
        assert!(!hw.add_present_fence(FenceTime::invalid()));
        assert!(control.0.lock().unwrap().is_empty());
        model.stop();
    }
}
