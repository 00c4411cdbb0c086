//! CommitBuffer - staged value + atomically published snapshot

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Writers mutate a staged `S` under a narrow lock; a commit derives an
/// immutable `D` from it and publishes it as a whole.
///
/// Readers get an `Arc<D>` and never observe a half-applied commit.
#[derive(Debug)]
pub struct CommitBuffer<S, D = S> {
    staged: Mutex<S>,
    published: RwLock<Arc<D>>,
    generation: AtomicU64,
}

impl<S, D> CommitBuffer<S, D> {
    pub fn new(staged: S, published: D) -> Self {
        Self {
            staged: Mutex::new(staged),
            published: RwLock::new(Arc::new(published)),
            generation: AtomicU64::new(0),
        }
    }

    /// Mutate the staged value.
    pub fn stage<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut staged = self.staged.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut staged)
    }

    /// Derive and publish a new snapshot from the staged value and the
    /// previous snapshot. Returns the new generation.
    pub fn commit_with(&self, f: impl FnOnce(&mut S, &D) -> D) -> u64 {
        let mut staged = self.staged.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.read();
        let next = Arc::new(f(&mut staged, &previous));
        *self.published.write().unwrap_or_else(PoisonError::into_inner) = next;
        // bumped while the staged lock is held
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Latest published snapshot.
    pub fn read(&self) -> Arc<D> {
        Arc::clone(&self.published.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of commits so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl<S: Clone> CommitBuffer<S, S> {
    /// Publish a copy of the staged value.
    pub fn commit(&self) -> u64 {
        self.commit_with(|staged, _| staged.clone())
    }
}

impl<S: Clone + Default> Default for CommitBuffer<S, S> {
    fn default() -> Self {
        Self::new(S::default(), S::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_staged_changes_invisible_until_commit() {
        let buffer: CommitBuffer<Vec<u32>> = CommitBuffer::default();
        buffer.stage(|v| v.push(1));
        assert!(buffer.read().is_empty(), "staged value leaked");
        assert_eq!(buffer.commit(), 1);
        assert_eq!(*buffer.read(), vec![1]);
    }

    #[test]
    fn test_commit_with_sees_previous_snapshot() {
        let buffer: CommitBuffer<u32, Vec<u32>> = CommitBuffer::new(0, Vec::new());
        for i in 1..=3 {
            buffer.stage(|s| *s = i);
            buffer.commit_with(|s, prev| {
                let mut next = prev.clone();
                next.push(*s);
                next
            });
        }
        assert_eq!(*buffer.read(), vec![1, 2, 3]);
        assert_eq!(buffer.generation(), 3);
    }

    #[test]
    fn test_readers_keep_their_snapshot() {
        let buffer = Arc::new(CommitBuffer::new(0u64, 0u64));
        let before = buffer.read();
        let writer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for i in 1..=100 {
                    buffer.stage(|s| *s = i);
                    buffer.commit();
                }
            })
        };
        writer.join().unwrap();
        assert_eq!(*before, 0);
        assert_eq!(*buffer.read(), 100);
    }
}
