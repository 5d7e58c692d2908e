//! Handle allocator, entity-component system, subsystem registry, and
//! event bus — the data-oriented half of the workspace (the other half,
//! the task scheduler, lives in `talon_task` and has no dependency on
//! this crate).
//!
//! Nothing in this crate is `Sync`: `HandleSet`, `FixedBlockAllocator`,
//! `SparseComponentStore`, and `World` all mutate through `&mut self`
//! with no internal locking, matching the spec's explicit statement that
//! ECS mutation must happen on one thread (conventionally "main") or be
//! externally serialized.
#![expect(
    unsafe_code,
    reason = "FixedBlockAllocator, HandleObjectPool, and SparseComponentStore are raw-pointer slab allocators by design (spec §4.2/§4.3)"
)]

#[cfg(not(feature = "std"))]
compile_error!("talon_ecs requires the `std` feature; there is no no_std fallback");

pub mod component;
pub mod error;
pub mod event;
pub mod handle;
pub mod pool;
pub mod registry;
pub mod slab;
pub mod typeid;
pub mod world;

pub use component::{component_type_id, ComponentTypeId, SparseComponentStore};
pub use event::EventBus;
pub use handle::{Handle, HandleSet};
pub use pool::HandleObjectPool;
pub use registry::{Subsystem, SubsystemRegistry, SubsystemSet};
pub use slab::FixedBlockAllocator;
pub use world::{ComponentAdded, ComponentQuery, ComponentRemoved, View, World};
