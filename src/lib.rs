//! `talon_core` — the runtime core of a data-oriented game/simulation
//! toolkit: a handle-based entity-component system and a work-stealing
//! task scheduler with parent-child job accounting.
//!
//! This crate is a thin facade over four workspace members, mirroring
//! the dependency order `Handle ← HandleSet ← {HandleObjectPool,
//! FixedBlockAllocator} ← SparseComponentStore ← World`, with the task
//! scheduler independent of the ECS and the subsystem registry/event
//! bus sitting above both:
//!
//! - [`cfg`] — shared compile-time constants.
//! - [`os`] — the platform facility (threads, sync primitives, the
//!   aligned heap allocator) the rest of the workspace builds on.
//! - [`task`] — the scheduler: task pool, run queue, worker threads.
//! - [`ecs`] — handles, the ECS [`ecs::World`], the subsystem registry,
//!   and the event bus.

pub use talon_cfg as cfg;
pub use talon_ecs as ecs;
pub use talon_os as os;
pub use talon_task as task;
