//! A light-weight task scheduler with automatic load balancing. Task
//! dependencies are expressed as parent-child relationships through a
//! single atomic job counter rather than an explicit DAG: completing a
//! task waits on its own closure *and* every descendant's closure.
//!
//! See [`Scheduler`] for the public surface.

mod handle;
mod pool;
mod scheduler;

pub use handle::TaskHandle;
pub use scheduler::{Hooks, Scheduler, SchedulerStatus};
