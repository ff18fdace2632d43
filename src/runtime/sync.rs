//! Lock resources exposed to user code as `Mutex` / `RwMutex` values.
//!
//! Locks are acquired and released by separate native calls, so they wrap
//! `parking_lot` raw locks instead of guard-based ones. The extra atomics
//! track ownership so that releasing a lock that is not held is reported as
//! an error instead of corrupting the raw lock.

use std::{
    fmt,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use parking_lot::{
    RawMutex, RawRwLock,
    lock_api::{RawMutex as _, RawRwLock as _},
};

pub struct SyncMutex {
    raw: RawMutex,
    locked: AtomicBool,
}

impl SyncMutex {
    pub fn new() -> Self {
        Self {
            raw: RawMutex::INIT,
            locked: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) {
        self.raw.lock();
        self.locked.store(true, Ordering::Release);
    }

    pub fn try_lock(&self) -> bool {
        if self.raw.try_lock() {
            self.locked.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    pub fn unlock(&self) -> Result<(), String> {
        if !self.locked.swap(false, Ordering::AcqRel) {
            return Err("unlock of a mutex that is not locked".to_string());
        }
        // SAFETY: `locked` was set while the raw lock was held and only this
        // call observed it flip back, so the raw lock is held exactly once.
        unsafe { self.raw.unlock() };
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

impl Default for SyncMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SyncMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncMutex")
            .field("locked", &self.is_locked())
            .finish()
    }
}

pub struct SyncRwMutex {
    raw: RawRwLock,
    readers: AtomicUsize,
    writer: AtomicBool,
}

impl SyncRwMutex {
    pub fn new() -> Self {
        Self {
            raw: RawRwLock::INIT,
            readers: AtomicUsize::new(0),
            writer: AtomicBool::new(false),
        }
    }

    pub fn read_lock(&self) {
        self.raw.lock_shared();
        self.readers.fetch_add(1, Ordering::AcqRel);
    }

    pub fn read_unlock(&self) -> Result<(), String> {
        self.readers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map_err(|_| "read unlock of a rw-mutex with no readers".to_string())?;
        // SAFETY: the reader count was positive, so a shared lock is held.
        unsafe { self.raw.unlock_shared() };
        Ok(())
    }

    pub fn write_lock(&self) {
        self.raw.lock_exclusive();
        self.writer.store(true, Ordering::Release);
    }

    pub fn try_write_lock(&self) -> bool {
        if self.raw.try_lock_exclusive() {
            self.writer.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    pub fn write_unlock(&self) -> Result<(), String> {
        if !self.writer.swap(false, Ordering::AcqRel) {
            return Err("write unlock of a rw-mutex that is not write-locked".to_string());
        }
        // SAFETY: the writer flag is only set while the exclusive lock is held.
        unsafe { self.raw.unlock_exclusive() };
        Ok(())
    }

    pub fn readers(&self) -> usize {
        self.readers.load(Ordering::Acquire)
    }

    pub fn is_write_locked(&self) -> bool {
        self.writer.load(Ordering::Acquire)
    }
}

impl Default for SyncRwMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SyncRwMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncRwMutex")
            .field("readers", &self.readers())
            .field("writer", &self.is_write_locked())
            .finish()
    }
}
