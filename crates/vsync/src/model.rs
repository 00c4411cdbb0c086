//! VsyncModel - estimator + dispatcher behind one facade

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use contracts::{Clock, ContractError, FenceTime, Name, Nsecs, VsyncConfig};
use tracing::{info, instrument, warn};

use crate::dispatcher::VsyncDispatcher;
use crate::estimator::{ModelSnapshot, VsyncEstimator};
use crate::listener::VsyncCallback;

/// Software vsync model fed by hardware vsync and present fences.
///
/// Every method takes `&self`; the model is shared between the hardware
/// vsync thread and the main context.
pub struct VsyncModel {
    estimator: Mutex<VsyncEstimator>,
    dispatcher: Mutex<VsyncDispatcher>,
    clock: Arc<dyn Clock>,
}

impl VsyncModel {
    pub fn new(config: &VsyncConfig, clock: Arc<dyn Clock>) -> Result<Self, ContractError> {
        let dispatcher = VsyncDispatcher::spawn(config, Arc::clone(&clock))?;
        Ok(Self {
            estimator: Mutex::new(VsyncEstimator::new(config)),
            dispatcher: Mutex::new(dispatcher),
            clock,
        })
    }

    fn estimator(&self) -> MutexGuard<'_, VsyncEstimator> {
        self.estimator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatcher(&self) -> MutexGuard<'_, VsyncDispatcher> {
        self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish while the estimator lock is held so that the dispatcher
    /// never sees parameters out of order.
    fn publish(&self, estimator: &VsyncEstimator) {
        let params = estimator.params();
        self.dispatcher()
            .update_model(params.period, params.phase, params.reference_time);
    }

    /// Feed one hardware vsync timestamp.
    ///
    /// Returns true while more hardware samples are wanted.
    pub fn add_resync_sample(&self, timestamp: Nsecs) -> bool {
        let mut estimator = self.estimator();
        let was_locked = estimator.is_locked();
        if estimator.add_resync_sample(timestamp) {
            self.publish(&estimator);
        }
        metrics::counter!("framesched_vsync_resync_samples_total").increment(1);

        let needs_more = estimator.needs_more_samples(self.has_any_listeners());
        if !needs_more && !was_locked {
            info!(
                period = estimator.params().period,
                phase = estimator.params().phase,
                "vsync model locked"
            );
        }
        needs_more
    }

    /// Feed a present fence. Returns true if a resync is wanted.
    pub fn add_present_fence(&self, fence: FenceTime) -> bool {
        let mut estimator = self.estimator();
        let resync = estimator.add_present_fence(fence);
        if resync && estimator.is_model_updated() {
            warn!(
                error_ns2 = estimator.error(),
                "present fences drifted from the vsync model"
            );
        }
        resync
    }

    pub fn begin_resync(&self) {
        self.estimator().begin_resync();
    }

    pub fn reset(&self) {
        self.estimator().reset();
    }

    /// Override the period with phase and reference reset to 0.
    #[instrument(name = "vsync_set_period", skip(self))]
    pub fn set_period(&self, period: Nsecs) {
        let mut estimator = self.estimator();
        estimator.set_period(period);
        self.publish(&estimator);
    }

    pub fn set_refresh_skip_count(&self, count: u32) {
        let mut estimator = self.estimator();
        if estimator.set_refresh_skip_count(count) {
            self.publish(&estimator);
        }
    }

    pub fn period(&self) -> Nsecs {
        self.estimator().period()
    }

    /// Predicted refresh `period_offset` periods after the next one.
    pub fn compute_next_refresh(&self, period_offset: i64) -> Nsecs {
        let now = self.clock.now();
        self.estimator().compute_next_refresh(now, period_offset)
    }

    pub fn add_event_listener(
        &self,
        name: impl Into<Name>,
        phase: Nsecs,
        callback: Arc<dyn VsyncCallback>,
    ) -> Result<(), ContractError> {
        self.dispatcher().add_listener(name, phase, callback)
    }

    pub fn remove_event_listener(&self, callback: &Arc<dyn VsyncCallback>) -> Result<(), ContractError> {
        self.dispatcher().remove_listener(callback)
    }

    pub fn change_phase_offset(
        &self,
        callback: &Arc<dyn VsyncCallback>,
        phase: Nsecs,
    ) -> Result<(), ContractError> {
        self.dispatcher().change_phase_offset(callback, phase)
    }

    pub fn has_any_listeners(&self) -> bool {
        self.dispatcher().listener_count() > 0
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        let mut snapshot = self.estimator().snapshot();
        let dispatcher = self.dispatcher();
        snapshot.listener_count = dispatcher.listener_count();
        snapshot.wakeup_latency_ns = dispatcher.wakeup_latency();
        snapshot
    }

    /// Stop the dispatch thread.
    pub fn stop(&self) {
        self.dispatcher().stop();
    }
}
