//! Vsync listeners and their next-event computation.

use std::fmt;
use std::sync::Arc;

use contracts::{Name, Nsecs};

/// Receives software vsync events.
///
/// Called from the dispatch thread with no internal lock held, so an
/// implementation may call back into the model or dispatcher.
pub trait VsyncCallback: Send + Sync {
    fn on_vsync(&self, when: Nsecs);
}

impl<F> VsyncCallback for F
where
    F: Fn(Nsecs) + Send + Sync,
{
    fn on_vsync(&self, when: Nsecs) {
        self(when)
    }
}

/// Registered listener.
#[derive(Clone)]
pub struct Listener {
    pub name: Name,
    /// Offset from the model phase
    pub phase: Nsecs,
    /// Last event time handed to this listener (already latency-adjusted)
    pub last_event_time: Nsecs,
    pub callback: Arc<dyn VsyncCallback>,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("last_event_time", &self.last_event_time)
            .finish_non_exhaustive()
    }
}

impl Listener {
    pub fn is_same_callback(&self, other: &Arc<dyn VsyncCallback>) -> bool {
        same_callback(&self.callback, other)
    }
}

/// Identity comparison of callbacks (data pointer only).
pub fn same_callback(a: &Arc<dyn VsyncCallback>, b: &Arc<dyn VsyncCallback>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Model parameters as seen by the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchModel {
    pub period: Nsecs,
    pub phase: Nsecs,
    pub reference_time: Nsecs,
    pub wakeup_latency: Nsecs,
}

/// Next event time for `listener` at or after `base_time`.
///
/// The result is already shifted earlier by the wake-up latency. An event
/// closer than `min_spacing_ratio * period` to the previous one is pushed
/// out by one period.
pub fn next_event_time(
    model: &DispatchModel,
    listener: &Listener,
    base_time: Nsecs,
    min_spacing_ratio: f64,
) -> Nsecs {
    let DispatchModel {
        period,
        phase,
        reference_time,
        wakeup_latency,
    } = *model;
    let last = listener.last_event_time + wakeup_latency;

    let mut base = base_time.max(last) - reference_time - (phase + listener.phase);
    if base < 0 {
        base = -period;
    }

    let mut time = (base / period + 1) * period + phase + listener.phase + reference_time;

    let min_spacing = (period as f64 * min_spacing_ratio) as Nsecs;
    if time - last < min_spacing {
        time += period;
    }

    time - wakeup_latency
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Nsecs = 16_666_667;

    fn listener(phase: Nsecs, last: Nsecs) -> Listener {
        Listener {
            name: Name::new("test"),
            phase,
            last_event_time: last,
            callback: Arc::new(|_: Nsecs| {}),
        }
    }

    #[test]
    fn test_first_event_after_registration() {
        // period 16.67ms, phase 0, reference 1s, listener offset 1ms,
        // registered at 1.005s with zero latency
        let model = DispatchModel {
            period: PERIOD,
            phase: 0,
            reference_time: 1_000_000_000,
            wakeup_latency: 0,
        };
        let now = 1_005_000_000;
        let l = listener(1_000_000, now - PERIOD / 2 + 1_000_000);
        let next = next_event_time(&model, &l, now, 0.6);
        assert_eq!(next, 1_000_000_000 + PERIOD + 1_000_000);
    }

    #[test]
    fn test_spacing_pushes_out_one_period() {
        let model = DispatchModel {
            period: PERIOD,
            phase: 0,
            reference_time: 0,
            wakeup_latency: 0,
        };
        // just fired at the edge; the next edge is a full period away
        let l = listener(0, 10 * PERIOD);
        let next = next_event_time(&model, &l, 10 * PERIOD - PERIOD / 4, 0.6);
        assert_eq!(next, 11 * PERIOD);

        // last event only 0.2 periods before the upcoming edge
        let l = listener(0, 11 * PERIOD - PERIOD / 5);
        let next = next_event_time(&model, &l, 10 * PERIOD + PERIOD / 2, 0.6);
        assert_eq!(next, 12 * PERIOD);
    }

    #[test]
    fn test_latency_applied_to_result() {
        let model = DispatchModel {
            period: PERIOD,
            phase: 0,
            reference_time: 0,
            wakeup_latency: 500_000,
        };
        let l = listener(0, 4 * PERIOD - 500_000);
        let next = next_event_time(&model, &l, 4 * PERIOD + 1, 0.6);
        assert_eq!(next, 5 * PERIOD - 500_000);
    }

    #[test]
    fn test_callback_identity() {
        let a: Arc<dyn VsyncCallback> = Arc::new(|_: Nsecs| {});
        let b: Arc<dyn VsyncCallback> = Arc::new(|_: Nsecs| {});
        assert!(same_callback(&a, &a.clone()));
        assert!(!same_callback(&a, &b));
    }
}
