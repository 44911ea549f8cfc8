//! Bounded-wait writable locks with a modified hint.
//!
//! The channel and schedule stores are shared with readers outside the
//! ingestion path, so writers only ever wait a bounded 10 ms for access
//! and report on release whether they changed anything. Observers poll
//! the state counter to notice changes.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Default bounded wait for writable access.
pub const LOCK_TIMEOUT: Duration = Duration::from_millis(10);

/// A store plus its change counter.
#[derive(Debug, Default)]
pub struct StateLock<T> {
    data: RwLock<T>,
    state: AtomicU64,
}

impl<T> StateLock<T> {
    pub fn new(value: T) -> Self {
        StateLock {
            data: RwLock::new(value),
            state: AtomicU64::new(0),
        }
    }

    /// Shared read access; may wait unboundedly.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.data.read()
    }

    /// Writable access with a bounded wait. `None` means the store stayed
    /// untouched and the caller must back off.
    pub fn try_write_for(&self, timeout: Duration) -> Option<StateGuard<'_, T>> {
        self.data.try_write_for(timeout).map(|guard| StateGuard {
            guard,
            state: &self.state,
            modified: false,
        })
    }

    /// Monotonic change counter, bumped whenever a writer releases with
    /// the modified hint set.
    pub fn state(&self) -> u64 {
        self.state.load(Ordering::Acquire)
    }
}

/// Write guard pairing the lock with the modified hint.
pub struct StateGuard<'a, T> {
    guard: RwLockWriteGuard<'a, T>,
    state: &'a AtomicU64,
    modified: bool,
}

impl<T> StateGuard<'_, T> {
    /// Release the lock, stating whether anything was changed. Dropping
    /// the guard without calling this releases unmodified.
    pub fn release(mut self, modified: bool) {
        self.modified = modified;
    }
}

impl<T> Deref for StateGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for StateGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for StateGuard<'_, T> {
    fn drop(&mut self) {
        if self.modified {
            self.state.fetch_add(1, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_modified_bumps_state() {
        let lock = StateLock::new(0u32);
        assert_eq!(lock.state(), 0);
        let mut guard = lock.try_write_for(LOCK_TIMEOUT).unwrap();
        *guard += 1;
        guard.release(true);
        assert_eq!(lock.state(), 1);
        assert_eq!(*lock.read(), 1);
    }

    #[test]
    fn test_release_unmodified_keeps_state() {
        let lock = StateLock::new(0u32);
        let guard = lock.try_write_for(LOCK_TIMEOUT).unwrap();
        guard.release(false);
        drop(lock.try_write_for(LOCK_TIMEOUT).unwrap());
        assert_eq!(lock.state(), 0);
    }

    #[test]
    fn test_bounded_wait_fails_under_contention() {
        let lock = StateLock::new(());
        let _reader = lock.read();
        assert!(lock
            .try_write_for(Duration::from_millis(1))
            .is_none());
    }
}
