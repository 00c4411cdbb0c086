//! Time base shared by every component.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Signed nanoseconds on the compositor's monotonic clock.
pub type Nsecs = i64;

pub const NSECS_PER_MS: Nsecs = 1_000_000;
pub const NSECS_PER_SEC: Nsecs = 1_000_000_000;

/// Source of "now".
///
/// Injected into the vsync model, the dispatcher thread and the scheduler so
/// that tests can drive time by hand.
pub trait Clock: Send + Sync {
    fn now(&self) -> Nsecs;
}

/// Monotonic clock anchored at construction time.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Nsecs {
        // Offset by one second so that "now - period" never goes negative
        // during the first frames.
        self.origin.elapsed().as_nanos() as Nsecs + NSECS_PER_SEC
    }
}

/// Hand-driven clock for deterministic tests and replays.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: Nsecs) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    pub fn set(&self, now: Nsecs) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: Nsecs) -> Nsecs {
        self.now.fetch_add(delta, Ordering::SeqCst) + delta
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Nsecs {
        self.now.load(Ordering::SeqCst)
    }
}

/// Convert a refresh rate to a period in nanoseconds.
pub fn period_from_hz(hz: f64) -> Nsecs {
    (NSECS_PER_SEC as f64 / hz).round() as Nsecs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(100);
        let other = clock.clone();
        assert_eq!(other.advance(50), 150);
        assert_eq!(clock.now(), 150);
    }

    #[test]
    fn test_monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(a >= NSECS_PER_SEC);
    }

    #[test]
    fn test_period_from_hz() {
        assert_eq!(period_from_hz(60.0), 16_666_667);
        assert_eq!(period_from_hz(120.0), 8_333_333);
    }
}
