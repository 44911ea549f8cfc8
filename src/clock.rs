//! Wall-clock access.
//!
//! The TDT consumer reads and occasionally corrects the system clock.
//! Those syscalls are isolated behind [`WallClock`] so the rest of the
//! crate, and every test, can run against a manual clock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClockError {
    /// The underlying syscall failed.
    #[error("clock syscall failed: {0}")]
    Os(#[from] std::io::Error),

    /// This platform cannot set the system clock.
    #[error("setting the system clock is not supported on this platform")]
    Unsupported,
}

/// Read and discipline the wall clock, in whole Unix seconds.
pub trait WallClock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> i64;

    /// Hard-set the wall clock.
    fn set(&self, time: i64) -> Result<(), ClockError>;

    /// Initiate a smooth adjustment by `delta` seconds.
    fn adjust(&self, delta: i64) -> Result<(), ClockError>;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => -(e.duration().as_secs() as i64),
        }
    }

    #[cfg(unix)]
    fn set(&self, time: i64) -> Result<(), ClockError> {
        let ts = libc::timespec {
            tv_sec: time as libc::time_t,
            tv_nsec: 0,
        };
        // SAFETY: passes a valid timespec; fails with EPERM without
        // CAP_SYS_TIME, which surfaces as an error.
        if unsafe { libc::clock_settime(libc::CLOCK_REALTIME, &ts) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn set(&self, _time: i64) -> Result<(), ClockError> {
        Err(ClockError::Unsupported)
    }

    #[cfg(unix)]
    fn adjust(&self, delta: i64) -> Result<(), ClockError> {
        let tv = libc::timeval {
            tv_sec: delta as libc::time_t,
            tv_usec: 0,
        };
        // SAFETY: both pointers are valid for the duration of the call.
        if unsafe { libc::adjtime(&tv, std::ptr::null_mut()) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn adjust(&self, _delta: i64) -> Result<(), ClockError> {
        Err(ClockError::Unsupported)
    }
}

/// A clock under test control. `set` and `adjust` are recorded and also
/// applied to the reported time.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
    sets: Mutex<Vec<i64>>,
    adjustments: Mutex<Vec<i64>>,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        ManualClock {
            now: AtomicI64::new(now),
            ..ManualClock::default()
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    /// Hard sets performed so far.
    pub fn sets(&self) -> Vec<i64> {
        self.sets.lock().clone()
    }

    /// Smooth adjustments initiated so far.
    pub fn adjustments(&self) -> Vec<i64> {
        self.adjustments.lock().clone()
    }
}

impl WallClock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn set(&self, time: i64) -> Result<(), ClockError> {
        self.sets.lock().push(time);
        self.now.store(time, Ordering::SeqCst);
        Ok(())
    }

    fn adjust(&self, delta: i64) -> Result<(), ClockError> {
        self.adjustments.lock().push(delta);
        self.now.fetch_add(delta, Ordering::SeqCst);
        Ok(())
    }
}
