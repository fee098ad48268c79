//! Single-writer, multiple-reader gate at column-file grain, so that
//! concurrent [`crate::ColumnReader`]s coexist with each other but
//! exclude a [`crate::ColumnWriter`]. Reuses the shared/exclusive lock
//! vocabulary of `txn::LockManager`
//! (`crates/txn/src/lib.rs`'s `LockMode`/`parking_lot::Mutex`+`Condvar`
//! wait loop) at one fixed key — the whole file — instead of per-page
//! two-phase locking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Default)]
struct LockState {
    readers: u32,
    writer: bool,
}

/// Grounded on `txn::LockManager`'s `Mutex`+`Condvar` wait loop, narrowed
/// to one lock key (the file itself) with no deadlock detection needed:
/// a single writer can never wait on itself, and readers never block
/// each other.
pub struct ColumnLock {
    state: Mutex<LockState>,
    condvar: Condvar,
}

impl ColumnLock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LockState::default()),
            condvar: Condvar::new(),
        })
    }

    /// Blocks until `mode` can be granted, then returns a handle that
    /// releases it — exactly once, whether by explicit
    /// [`LockHandle::release`] or by drop.
    pub fn acquire(self: &Arc<Self>, mode: LockMode) -> LockHandle {
        let mut state = self.state.lock();
        loop {
            let grantable = match mode {
                LockMode::Shared => !state.writer,
                LockMode::Exclusive => !state.writer && state.readers == 0,
            };
            if grantable {
                match mode {
                    LockMode::Shared => state.readers += 1,
                    LockMode::Exclusive => state.writer = true,
                }
                break;
            }
            self.condvar.wait(&mut state);
        }
        LockHandle {
            lock: self.clone(),
            mode,
            released: AtomicBool::new(false),
        }
    }

    fn release(&self, mode: LockMode) {
        let mut state = self.state.lock();
        match mode {
            LockMode::Shared => state.readers = state.readers.saturating_sub(1),
            LockMode::Exclusive => state.writer = false,
        }
        drop(state);
        self.condvar.notify_all();
    }
}

/// A held lock handle. `release()` is idempotent — calling
/// `close()`/`release()` on an already-disposed reference is safe;
/// [`Drop`] calls it as a safety net.
pub struct LockHandle {
    lock: Arc<ColumnLock>,
    mode: LockMode,
    released: AtomicBool,
}

impl LockHandle {
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.lock.release(self.mode);
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn readers_coexist() {
        let lock = ColumnLock::new();
        let a = lock.acquire(LockMode::Shared);
        let b = lock.acquire(LockMode::Shared);
        a.release();
        b.release();
    }

    #[test]
    fn writer_excludes_readers() {
        let lock = ColumnLock::new();
        let writer_lock = lock.clone();
        let writer = writer_lock.acquire(LockMode::Exclusive);
        let reader_lock = lock.clone();
        let handle = thread::spawn(move || {
            let _reader = reader_lock.acquire(LockMode::Shared);
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());
        writer.release();
        handle.join().unwrap();
    }

    #[test]
    fn release_is_idempotent() {
        let lock = ColumnLock::new();
        let handle = lock.acquire(LockMode::Shared);
        handle.release();
        handle.release();
    }
}
