//! Re-exports of the synchronization primitives the rest of the workspace
//! builds on: `Mutex`/`Condvar` for the scheduler's run queue and task
//! pool, `Arc` for shared ownership of the `Scheduler`, and the atomic
//! integer types for per-task job counters and subsystem/component type
//! ids.

pub use std::sync::atomic;
pub use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, Weak};
