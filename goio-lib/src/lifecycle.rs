//! Device ownership checks wrapped around every transport access.

use crate::error::{GoError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Lock/usability protocol a session consults before touching the device.
pub trait DeviceLifecycle: Send + Sync {
    /// Take exclusive use of the device for the calling thread.
    fn lock_device(&self, timeout: Duration) -> Result<()>;

    fn unlock_device(&self);

    /// False once the device is being torn down.
    fn is_ok_to_use(&self) -> bool;
}

#[derive(Debug, Default)]
struct Ownership {
    owner: Option<ThreadId>,
    depth: u32,
}

/// In-process lifecycle: one owning thread at a time, reentrant, and a
/// one-way `retire` switch that makes the device unusable.
#[derive(Debug, Default)]
pub struct LocalLifecycle {
    ownership: Mutex<Ownership>,
    released: Condvar,
    retired: AtomicBool,
}

impl LocalLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the device as mid-teardown. Later locks fail.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        self.released.notify_all();
    }

    fn ownership(&self) -> MutexGuard<'_, Ownership> {
        self.ownership.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceLifecycle for LocalLifecycle {
    fn lock_device(&self, timeout: Duration) -> Result<()> {
        let me = thread::current().id();
        let deadline = Instant::now() + timeout;
        let mut ownership = self.ownership();
        loop {
            if !self.is_ok_to_use() {
                return Err(GoError::DeviceUnavailable("device is being retired".to_string()));
            }
            match ownership.owner {
                None => {
                    ownership.owner = Some(me);
                    ownership.depth = 1;
                    return Ok(());
                }
                Some(owner) if owner == me => {
                    ownership.depth += 1;
                    return Ok(());
                }
                Some(_) => {}
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(?timeout, "Device lock wait timed out");
                return Err(GoError::DeviceUnavailable("device is locked by another thread".to_string()));
            }
            ownership = self
                .released
                .wait_timeout(ownership, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn unlock_device(&self) {
        let me = thread::current().id();
        let mut ownership = self.ownership();
        if ownership.owner != Some(me) {
            warn!("unlock_device called by a thread that does not hold the device");
            return;
        }
        ownership.depth -= 1;
        if ownership.depth == 0 {
            ownership.owner = None;
            self.released.notify_one();
        }
    }

    fn is_ok_to_use(&self) -> bool {
        !self.retired.load(Ordering::Acquire)
    }
}

/// Holds the device lock until dropped.
pub struct LifecycleGuard<'a> {
    lifecycle: &'a dyn DeviceLifecycle,
}

impl<'a> LifecycleGuard<'a> {
    pub fn acquire(lifecycle: &'a dyn DeviceLifecycle, timeout: Duration) -> Result<Self> {
        if !lifecycle.is_ok_to_use() {
            return Err(GoError::DeviceUnavailable("device is not usable".to_string()));
        }
        lifecycle.lock_device(timeout)?;
        let guard = Self { lifecycle };
        if !lifecycle.is_ok_to_use() {
            return Err(GoError::DeviceUnavailable("device retired while locking".to_string()));
        }
        Ok(guard)
    }
}

impl Drop for LifecycleGuard<'_> {
    fn drop(&mut self) {
        self.lifecycle.unlock_device();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_reentrant_lock() {
        let lc = LocalLifecycle::new();
        let outer = LifecycleGuard::acquire(&lc, Duration::from_millis(10)).unwrap();
        let inner = LifecycleGuard::acquire(&lc, Duration::from_millis(10)).unwrap();
        drop(inner);
        drop(outer);
        assert!(lc.ownership().owner.is_none());
    }

    #[test]
    fn test_other_thread_times_out() {
        let lc = Arc::new(LocalLifecycle::new());
        let _held = LifecycleGuard::acquire(lc.as_ref(), Duration::from_millis(10)).unwrap();

        let other = Arc::clone(&lc);
        let result = thread::spawn(move || other.lock_device(Duration::from_millis(20)))
            .join()
            .unwrap();
        assert!(matches!(result, Err(GoError::DeviceUnavailable(_))));
    }

    #[test]
    fn test_retired_device_refuses_lock() {
        let lc = LocalLifecycle::new();
        lc.retire();
        assert!(!lc.is_ok_to_use());
        assert!(LifecycleGuard::acquire(&lc, Duration::from_millis(10)).is_err());
    }
}
