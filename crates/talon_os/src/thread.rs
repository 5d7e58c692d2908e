//! Thread spawn/join/yield and CPU-count discovery, used by the scheduler
//! to size its worker pool (`cpu_count - 1`, minimum 1, per the spec).

use core::num::NonZero;

pub use std::thread::{sleep, yield_now, JoinHandle, Thread, ThreadId};

/// Spawns a named OS thread, mirroring `std::thread::Builder::spawn` but
/// panicking on failure like the teacher's platform crate does for the
/// handful of threads a process typically spawns at startup.
pub fn spawn<F>(name: impl Into<String>, f: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.into())
        .spawn(f)
        .expect("failed to spawn OS thread")
}

/// Returns an estimate of the number of CPUs available to this process.
///
/// Never returns zero: on platforms where the underlying query fails,
/// this falls back to `1` rather than propagating the error, since the
/// only consumer (the scheduler's default worker count) needs a lower
/// bound, not an exact answer.
pub fn available_parallelism() -> NonZero<usize> {
    std::thread::available_parallelism().unwrap_or(NonZero::new(1).unwrap())
}

/// Returns the current thread's id, used by the scheduler to resolve a
/// calling thread back to its worker index.
pub fn current_id() -> ThreadId {
    std::thread::current().id()
}
