//! Compile-time constants shared by the rest of the workspace.
//!
//! Mirrors the role the original C++ preprocessor constants played
//! (`kEntMaxComponents`, `kEntPoolChunkSize`, `kFallbackComponentSize`): a
//! single place to tune without touching the crates that consume them.

#![no_std]

/// Entries a [`SparseComponentStore`](../talon_ecs/struct.SparseComponentStore.html)
/// keeps in its linear-scan "small mode" table before spilling to a dense,
/// directly-indexed vector.
///
/// Named per the redesign flag in the originating spec: the source's
/// `kFallbackComponentSize` was a magic number. The value itself (8) is
/// unchanged — it affects performance, not correctness.
pub const SMALL_SET_CAPACITY: usize = 8;

/// Initial reserved capacity for the scheduler's task-record pool (a
/// grow-only `Vec<Task>`, not chunked like [`FixedBlockAllocator`] —
/// reserving this many slots up front just avoids a reallocation for the
/// common case of a handful of in-flight tasks).
pub const DEFAULT_TASK_POOL_CHUNK_SIZE: usize = 64;

/// Maximum length, in bytes, of a task's debug name. Longer names are
/// truncated, never rejected (matches the original's fixed `char name[64]`).
pub const TASK_NAME_MAX: usize = 64;
