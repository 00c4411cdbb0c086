//! SyncPoint - cross-surface frame barrier

use std::sync::atomic::{AtomicBool, Ordering};

/// Barrier between a deferred transaction and a frame of another surface.
///
/// Shared between the barrier surface (local point) and the deferring
/// surface (remote point). Each flag is set at most once; setting it again
/// is a no-op.
#[derive(Debug)]
pub struct SyncPoint {
    frame_number: u64,
    frame_available: AtomicBool,
    transaction_applied: AtomicBool,
}

impl SyncPoint {
    pub fn new(frame_number: u64) -> Self {
        Self {
            frame_number,
            frame_available: AtomicBool::new(false),
            transaction_applied: AtomicBool::new(false),
        }
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn frame_is_available(&self) -> bool {
        self.frame_available.load(Ordering::Acquire)
    }

    pub fn transaction_is_applied(&self) -> bool {
        self.transaction_applied.load(Ordering::Acquire)
    }

    /// Returns true if this call set the flag.
    pub fn set_frame_available(&self) -> bool {
        !self.frame_available.swap(true, Ordering::AcqRel)
    }

    /// Returns true if this call set the flag.
    pub fn set_transaction_applied(&self) -> bool {
        !self.transaction_applied.swap(true, Ordering::AcqRel)
    }

    /// Both sides are done; the barrier may be forgotten.
    pub fn is_complete(&self) -> bool {
        self.frame_is_available() && self.transaction_is_applied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_set_once() {
        let point = SyncPoint::new(5);
        assert!(point.set_frame_available());
        assert!(!point.set_frame_available(), "second set must be a no-op");
        assert!(!point.is_complete());
        assert!(point.set_transaction_applied());
        assert!(!point.set_transaction_applied());
        assert!(point.is_complete());
        assert_eq!(point.frame_number(), 5);
    }
}
