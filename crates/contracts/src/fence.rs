//! FenceTime - cacheable signal-time handle for acquire and present fences.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::Nsecs;

const PENDING: Nsecs = Nsecs::MAX;
const INVALID: Nsecs = -1;

/// Observed state of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceState {
    /// Not signalled yet
    Pending,
    /// Never going to carry a usable time
    Invalid,
    /// Signalled at the given time
    Signaled(Nsecs),
}

/// Shared fence handle.
///
/// The producer side calls [`FenceTime::signal`] once; every clone observes
/// the cached signal time afterwards. A second signal is ignored.
#[derive(Clone)]
pub struct FenceTime {
    signal_time: Arc<AtomicI64>,
}

impl FenceTime {
    /// A fence that has not fired yet.
    pub fn pending() -> Self {
        Self {
            signal_time: Arc::new(AtomicI64::new(PENDING)),
        }
    }

    /// A fence that already fired at `when`.
    pub fn signaled(when: Nsecs) -> Self {
        Self {
            signal_time: Arc::new(AtomicI64::new(when.max(0))),
        }
    }

    /// A fence without a usable time (e.g. no present fence from the HAL).
    pub fn invalid() -> Self {
        Self {
            signal_time: Arc::new(AtomicI64::new(INVALID)),
        }
    }

    /// Record the signal time. Returns false if the fence was not pending.
    pub fn signal(&self, when: Nsecs) -> bool {
        self.signal_time
            .compare_exchange(PENDING, when.max(0), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn state(&self) -> FenceState {
        match self.signal_time.load(Ordering::Acquire) {
            PENDING => FenceState::Pending,
            INVALID => FenceState::Invalid,
            t => FenceState::Signaled(t),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == FenceState::Pending
    }

    pub fn has_signaled(&self) -> bool {
        matches!(self.state(), FenceState::Signaled(_))
    }

    /// Signal time, if signalled.
    pub fn signal_time(&self) -> Option<Nsecs> {
        match self.state() {
            FenceState::Signaled(t) => Some(t),
            _ => None,
        }
    }
}

impl Default for FenceTime {
    fn default() -> Self {
        Self::invalid()
    }
}

impl fmt::Debug for FenceTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FenceTime").field(&self.state()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_is_visible_through_clones() {
        let fence = FenceTime::pending();
        let observer = fence.clone();
        assert!(observer.is_pending());
        assert!(fence.signal(1_000));
        assert_eq!(observer.signal_time(), Some(1_000));
    }

    #[test]
    fn test_signal_only_once() {
        let fence = FenceTime::pending();
        assert!(fence.signal(10));
        assert!(!fence.signal(20));
        assert_eq!(fence.state(), FenceState::Signaled(10));
    }

    #[test]
    fn test_invalid_never_signals() {
        let fence = FenceTime::invalid();
        assert!(!fence.signal(5));
        assert_eq!(fence.state(), FenceState::Invalid);
        assert!(!fence.has_signaled());
    }
}
