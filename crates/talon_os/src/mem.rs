//! The aligned heap allocator interface the spec's external interfaces
//! table calls for: `malloc`/`free` equivalents with alignment of at
//! least `alignof(pointer)`, used by `talon_ecs`'s slab allocator to back
//! component storage.

pub use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
