//! Bounded concurrency primitives for the executor.
//!
//! `cargo` bounds concurrent rustc invocations with a counting semaphore
//! (`util::TaskPool`) rather than an async runtime or a fixed thread pool
//! that owns the work itself — callers run on whatever thread they're
//! already on and simply block until a permit is available. Wireit reuses
//! the same shape for two independent limits: how many child script
//! processes may run at once, and how many file descriptors the
//! fingerprinting/caching machinery may hold open at once.

use std::sync::{Condvar, Mutex};

/// The default size for a file-descriptor budget semaphore, for callers
/// (the manifest reader, the executor) that have no more specific signal
/// to size it from: generous enough that ordinary hashing/manifest I/O
/// never serializes on it, while still bounding the worst case (a huge
/// `files` glob list, or a package tree with thousands of manifests) to a
/// number of concurrently open descriptors the OS will accept.
pub fn default_file_descriptor_capacity() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus.saturating_mul(8).max(64)
}

/// A counting semaphore. `acquire()` blocks the calling thread until a
/// permit is available and returns a guard that releases it on drop.
pub struct Semaphore {
    state: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Semaphore {
            state: Mutex::new(permits),
            cv: Condvar::new(),
        }
    }

    pub fn acquire(&self) -> SemaphoreGuard<'_> {
        let mut available = self.state.lock().unwrap();
        while *available == 0 {
            available = self.cv.wait(available).unwrap();
        }
        *available -= 1;
        SemaphoreGuard { semaphore: self }
    }

    fn release(&self) {
        let mut available = self.state.lock().unwrap();
        *available += 1;
        self.cv.notify_one();
    }
}

/// Holds one permit; releasing it back to the semaphore happens
/// automatically on drop, the way a lock guard releases a mutex.
pub struct SemaphoreGuard<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

/// The two independent limits the executor enforces: how many script
/// processes may be running at once, and how many files may be open at
/// once for hashing/cache I/O. Separate so that fingerprinting many small
/// dependency files doesn't starve a slow-running script (or vice versa).
pub struct ResourcePools {
    pub processes: Semaphore,
    pub file_descriptors: Semaphore,
}

impl ResourcePools {
    pub fn new(max_concurrent_processes: usize, max_concurrent_file_descriptors: usize) -> Self {
        ResourcePools {
            processes: Semaphore::new(max_concurrent_processes.max(1)),
            file_descriptors: Semaphore::new(max_concurrent_file_descriptors.max(1)),
        }
    }
}
