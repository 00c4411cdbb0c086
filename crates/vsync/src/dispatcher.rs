//! VsyncDispatcher - dedicated thread firing phase-shifted vsync callbacks

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use contracts::{Clock, ContractError, Name, Nsecs, VsyncConfig};
use slab::Slab;
use tracing::{debug, info, trace};

use crate::listener::{next_event_time, same_callback, DispatchModel, Listener, VsyncCallback};

/// Dispatcher state guarded by one mutex.
#[derive(Debug, Default)]
struct DispatchState {
    model: DispatchModel,
    listeners: Slab<Listener>,
    stop: bool,
}

struct Shared {
    state: Mutex<DispatchState>,
    cond: Condvar,
    clock: Arc<dyn Clock>,
    min_spacing_ratio: f64,
    max_wakeup_latency: Nsecs,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the dispatch thread and its listener arena.
pub struct VsyncDispatcher {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl VsyncDispatcher {
    /// Spawn the dispatch thread (idle until a period is published).
    pub fn spawn(config: &VsyncConfig, clock: Arc<dyn Clock>) -> Result<Self, ContractError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(DispatchState::default()),
            cond: Condvar::new(),
            clock,
            min_spacing_ratio: config.min_event_spacing_ratio,
            max_wakeup_latency: config.max_wakeup_latency_ns,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("vsync-dispatch".to_string())
            .spawn(move || dispatch_loop(&worker_shared))?;

        info!(
            min_spacing_ratio = config.min_event_spacing_ratio,
            max_wakeup_latency_ns = config.max_wakeup_latency_ns,
            "vsync dispatcher started"
        );

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Publish new model parameters; wakes the thread.
    pub fn update_model(&self, period: Nsecs, phase: Nsecs, reference_time: Nsecs) {
        let mut state = self.shared.lock();
        state.model.period = period;
        state.model.phase = phase;
        state.model.reference_time = reference_time;
        trace!(period, phase, reference_time, "dispatcher model updated");
        self.shared.cond.notify_all();
    }

    pub fn add_listener(
        &self,
        name: impl Into<Name>,
        phase: Nsecs,
        callback: Arc<dyn VsyncCallback>,
    ) -> Result<(), ContractError> {
        let name = name.into();
        let mut state = self.shared.lock();
        if state.listeners.iter().any(|(_, l)| l.is_same_callback(&callback)) {
            return Err(ContractError::duplicate_listener(name.as_str()));
        }

        // Behave as if the listener fired half a period ago so that it
        // neither fires immediately nor skips the upcoming edge.
        let now = self.shared.clock.now();
        let model = state.model;
        let last_event_time = now - model.period / 2 + model.phase - model.wakeup_latency;

        debug!(listener = %name, phase, last_event_time, "vsync listener added");
        state.listeners.insert(Listener {
            name,
            phase,
            last_event_time,
            callback,
        });
        self.shared.cond.notify_all();
        Ok(())
    }

    pub fn remove_listener(&self, callback: &Arc<dyn VsyncCallback>) -> Result<(), ContractError> {
        let mut state = self.shared.lock();
        let key = find_listener(&state.listeners, callback).ok_or(ContractError::ListenerNotFound)?;
        let listener = state.listeners.remove(key);
        debug!(listener = %listener.name, "vsync listener removed");
        self.shared.cond.notify_all();
        Ok(())
    }

    /// Move an existing listener to a new phase offset.
    ///
    /// The last event time shifts by the same amount so the spacing check
    /// does not swallow or duplicate an edge.
    pub fn change_phase_offset(
        &self,
        callback: &Arc<dyn VsyncCallback>,
        phase: Nsecs,
    ) -> Result<(), ContractError> {
        let mut state = self.shared.lock();
        let key = find_listener(&state.listeners, callback).ok_or(ContractError::ListenerNotFound)?;
        let period = state.model.period;
        let listener = &mut state.listeners[key];
        // same frame under the new offset: wrap the shift into (-period/2, period/2]
        let mut diff = phase - listener.phase;
        if period > 0 {
            if 2 * diff > period {
                diff -= period;
            } else if 2 * diff <= -period {
                diff += period;
            }
        }
        listener.phase = phase;
        listener.last_event_time += diff;
        debug!(listener = %listener.name, phase, "vsync listener phase changed");
        self.shared.cond.notify_all();
        Ok(())
    }

    pub fn listener_count(&self) -> usize {
        self.shared.lock().listeners.len()
    }

    pub fn wakeup_latency(&self) -> Nsecs {
        self.shared.lock().model.wakeup_latency
    }

    /// Stop and join the thread. Idempotent.
    pub fn stop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.stop = true;
            self.shared.cond.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("vsync dispatch thread panicked");
            }
            info!("vsync dispatcher stopped");
        }
    }
}

impl Drop for VsyncDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn find_listener(listeners: &Slab<Listener>, callback: &Arc<dyn VsyncCallback>) -> Option<usize> {
    listeners
        .iter()
        .find(|(_, l)| same_callback(&l.callback, callback))
        .map(|(key, _)| key)
}

/// Earliest deadline over all listeners.
fn next_target(state: &DispatchState, now: Nsecs, ratio: f64) -> Option<Nsecs> {
    state
        .listeners
        .iter()
        .map(|(_, l)| next_event_time(&state.model, l, now, ratio))
        .min()
}

/// Listeners due at `now`; records their new last event time.
fn gather_due(state: &mut DispatchState, now: Nsecs, ratio: f64) -> Vec<(Name, Arc<dyn VsyncCallback>, Nsecs)> {
    let model = state.model;
    let one_period_ago = now - model.period;
    let mut due = Vec::new();
    for (_, listener) in state.listeners.iter_mut() {
        let t = next_event_time(&model, listener, one_period_ago, ratio);
        if t < now {
            listener.last_event_time = t;
            due.push((listener.name.clone(), Arc::clone(&listener.callback), t));
        }
    }
    due
}

fn dispatch_loop(shared: &Shared) {
    let ratio = shared.min_spacing_ratio;
    let mut state = shared.lock();
    loop {
        if state.stop {
            break;
        }

        // Idle: no model yet
        if state.model.period <= 0 {
            state = shared.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
            continue;
        }

        let now = shared.clock.now();
        let Some(target) = next_target(&state, now, ratio) else {
            state = shared.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
            continue;
        };

        let mut timed_wake = false;
        if now < target {
            let timeout = Duration::from_nanos((target - now) as u64);
            let (guard, result) = shared
                .cond
                .wait_timeout(state, timeout)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
            if state.stop {
                break;
            }
            timed_wake = result.timed_out();
        }

        let now = shared.clock.now();
        if timed_wake {
            let latency = &mut state.model.wakeup_latency;
            *latency = ((*latency * 63 + (now - target)) / 64).clamp(0, shared.max_wakeup_latency);
            metrics::gauge!("framesched_vsync_wakeup_latency_ns").set(*latency as f64);
        }

        let due = gather_due(&mut state, now, ratio);
        if due.is_empty() {
            continue;
        }

        // Callbacks run without the lock held
        drop(state);
        for (name, callback, when) in due {
            trace!(listener = %name, when, "vsync event");
            metrics::counter!("framesched_vsync_events_total", "listener" => name.to_string())
                .increment(1);
            callback.on_vsync(when);
        }
        state = shared.lock();
    }
    debug!("vsync dispatch loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ManualClock, MonotonicClock};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    const PERIOD: Nsecs = 16_666_667;

    fn recording_callback() -> (Arc<dyn VsyncCallback>, mpsc::Receiver<Nsecs>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let callback: Arc<dyn VsyncCallback> = Arc::new(move |when: Nsecs| {
            let _ = tx.lock().unwrap().send(when);
        });
        (callback, rx)
    }

    /// Dispatcher with a stopped thread so listener state can be inspected.
    fn stopped_dispatcher(now: Nsecs) -> VsyncDispatcher {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(now));
        let mut dispatcher = VsyncDispatcher::spawn(&VsyncConfig::default(), clock).unwrap();
        dispatcher.stop();
        dispatcher.update_model(PERIOD, 0, 0);
        dispatcher
    }

    fn fire_at(dispatcher: &VsyncDispatcher, when: Nsecs) {
        let mut state = dispatcher.shared.lock();
        for (_, listener) in state.listeners.iter_mut() {
            listener.last_event_time = when;
        }
    }

    fn next_after(dispatcher: &VsyncDispatcher, now: Nsecs) -> (Nsecs, Nsecs) {
        let state = dispatcher.shared.lock();
        let (_, listener) = state.listeners.iter().next().unwrap();
        let ratio = VsyncConfig::default().min_event_spacing_ratio;
        (
            listener.last_event_time,
            next_event_time(&state.model, listener, now, ratio),
        )
    }

    #[test]
    fn test_phase_change_shifts_last_event_time() {
        let fired = 10 * PERIOD;
        let now = fired + 1_000_000;
        let dispatcher = stopped_dispatcher(now);
        let (callback, _rx) = recording_callback();
        dispatcher.add_listener("app", 0, Arc::clone(&callback)).unwrap();
        fire_at(&dispatcher, fired);

        dispatcher.change_phase_offset(&callback, 2_000_000).unwrap();
        let (last, next) = next_after(&dispatcher, now);
        assert_eq!(last, fired + 2_000_000, "last event time not shifted by the delta");
        // the 10P+2ms edge belongs to the frame already fired; the next frame is not skipped
        assert_eq!(next, 11 * PERIOD + 2_000_000);

        dispatcher.change_phase_offset(&callback, 0).unwrap();
        let (last, next) = next_after(&dispatcher, now);
        assert_eq!(last, fired, "shift back did not restore the last event time");
        assert_eq!(next, 11 * PERIOD);
    }

    #[test]
    fn test_large_phase_change_wraps_to_nearest_frame() {
        let fired = 10 * PERIOD;
        let now = fired + 1_000_000;
        let dispatcher = stopped_dispatcher(now);
        let (callback, _rx) = recording_callback();
        dispatcher.add_listener("app", 0, Arc::clone(&callback)).unwrap();
        fire_at(&dispatcher, fired);

        // +0.9 period is the same frame shifted by -0.1 period
        let phase = 9 * PERIOD / 10;
        dispatcher.change_phase_offset(&callback, phase).unwrap();
        let (last, next) = next_after(&dispatcher, now);
        assert_eq!(last, fired + phase - PERIOD, "shift not wrapped");
        assert_eq!(next, 10 * PERIOD + phase, "edge at the new offset skipped");
        assert_eq!(next - last, PERIOD, "one event per period across the change");
    }

    #[test]
    fn test_duplicate_listener_rejected() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_000_000_000));
        let dispatcher = VsyncDispatcher::spawn(&VsyncConfig::default(), clock).unwrap();
        let (callback, _rx) = recording_callback();

        dispatcher.add_listener("app", 0, Arc::clone(&callback)).unwrap();
        let err = dispatcher.add_listener("app-again", 0, Arc::clone(&callback)).unwrap_err();
        assert!(matches!(err, ContractError::DuplicateListener { .. }), "got: {err}");
        assert_eq!(dispatcher.listener_count(), 1);
    }

    #[test]
    fn test_remove_unknown_listener() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let dispatcher = VsyncDispatcher::spawn(&VsyncConfig::default(), clock).unwrap();
        let (callback, _rx) = recording_callback();
        assert!(matches!(
            dispatcher.remove_listener(&callback),
            Err(ContractError::ListenerNotFound)
        ));
        assert!(matches!(
            dispatcher.change_phase_offset(&callback, 10),
            Err(ContractError::ListenerNotFound)
        ));
    }

    #[test]
    fn test_idle_without_period() {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let dispatcher = VsyncDispatcher::spawn(&VsyncConfig::default(), clock).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        dispatcher
            .add_listener("idle", 0, Arc::new(move |_: Nsecs| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 0, "fired without a model");
    }

    #[test]
    fn test_first_event_after_registration_on_model_edge() {
        let clock = Arc::new(MonotonicClock::new());
        let mut dispatcher =
            VsyncDispatcher::spawn(&VsyncConfig::default(), clock.clone()).unwrap();
        let reference = clock.now();
        dispatcher.update_model(PERIOD, 0, reference);

        let (callback, rx) = recording_callback();
        let registered_at = clock.now();
        dispatcher.add_listener("app", 0, callback).unwrap();

        let first = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("no vsync event within 2s");
        let second = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("no second vsync event within 2s");
        dispatcher.stop();

        let latency_bound = VsyncConfig::default().max_wakeup_latency_ns;
        assert!(
            first + latency_bound > registered_at,
            "first event {first} not after registration {registered_at}"
        );
        // event times sit on an edge, shifted by at most the learned latency
        let offset = (first - reference).rem_euclid(PERIOD);
        assert!(
            offset == 0 || offset >= PERIOD - latency_bound,
            "event offset {offset} not on a model edge"
        );
        assert!(second > first, "events not increasing");
    }

    #[test]
    fn test_stop_is_idempotent() {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let mut dispatcher = VsyncDispatcher::spawn(&VsyncConfig::default(), clock).unwrap();
        dispatcher.update_model(PERIOD, 0, 0);
        dispatcher.stop();
        dispatcher.stop();
    }
}
