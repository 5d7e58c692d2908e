//! [`HandleObjectPool`]: a [`HandleSet`] paired with densely packed,
//! handle-indexed storage of `T` — the general-purpose object pool a host
//! reaches for when it wants "a `Vec<T>` with stable, versioned handles"
//! for its *own* resource kinds (meshes, materials, audio voices, ...),
//! as opposed to [`crate::component::SparseComponentStore`], which is
//! specifically entity-index-keyed and optimized for the common case of a
//! component attached to only a few entities.
//!
//! Grounded in `original_source/source/codebase/memory/indexed_pool.hpp`
//! (`IndexedObjectPoolT<T>`): a handle set for lifecycle, a
//! [`FixedBlockAllocator`] for backing storage, and a `std::vector<void*>`
//! (here `Vec<Option<NonNull<T>>>`) indexed directly by handle index so
//! `get` is a single bounds check plus a load, not a scan.
#![expect(unsafe_code, reason = "raw-pointer slab allocator")]

use core::ptr::NonNull;

use crate::handle::{Handle, HandleSet};
use crate::slab::FixedBlockAllocator;

/// A [`HandleSet`]-backed pool of `T` values, indexed directly by handle
/// index (one table slot per issued handle, `None` once freed).
///
/// Unlike [`crate::component::SparseComponentStore`] (which is keyed by
/// *entity* index and optimizes for sparsity), `HandleObjectPool` mints
/// its own handles and grows its index table one-for-one with them — it
/// is the building block a host uses for a uniform collection of its own
/// resources, not for per-entity component storage.
pub struct HandleObjectPool<T> {
    handles: HandleSet,
    allocator: FixedBlockAllocator,
    table: Vec<Option<NonNull<T>>>,
}

impl<T: 'static> HandleObjectPool<T> {
    /// Creates an empty pool, backed by a [`FixedBlockAllocator`] sized
    /// for `T` that grows `chunk_size` elements at a time.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            handles: HandleSet::new(),
            allocator: FixedBlockAllocator::new(size_of::<T>(), align_of::<T>(), chunk_size.max(1), core::any::type_name::<T>()),
            table: Vec::new(),
        }
    }

    /// Number of values currently live in the pool.
    pub fn len(&self) -> usize {
        self.allocator.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mints a fresh handle, constructs `value` into a block from the
    /// backing allocator, and records it at the handle's index in the
    /// dense table. Mirrors the original's `malloc(args...)` constructing
    /// in place with the allocator's block.
    pub fn malloc(&mut self, value: T) -> Handle {
        let handle = self.handles.create();
        let index = handle.index() as usize;
        if self.table.len() <= index {
            self.table.resize(index + 1, None);
        }

        let block = self.allocator.malloc().cast::<T>();
        let block = NonNull::new(block).expect("malloc returned null");
        // SAFETY: `block` is a fresh, uninitialized block sized for `T`.
        unsafe { block.as_ptr().write(value) };
        self.table[index] = Some(block);

        handle
    }

    /// Read-only access to the value at `handle`, or `None` if the handle
    /// is stale or was never minted by this pool.
    pub fn get(&self, handle: Handle) -> Option<&T> {
        if !self.handles.is_alive(handle) {
            return None;
        }
        let block = self.table.get(handle.index() as usize).copied().flatten()?;
        // SAFETY: a live handle's table slot always holds a constructed
        // `T` until `free` runs.
        Some(unsafe { block.as_ref() })
    }

    /// Mutable access to the value at `handle`, under the same conditions
    /// as [`Self::get`].
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        if !self.handles.is_alive(handle) {
            return None;
        }
        let block = self.table.get_mut(handle.index() as usize)?.as_mut()?;
        // SAFETY: see `get`; `&mut self` guarantees exclusive access.
        Some(unsafe { block.as_mut() })
    }

    /// Destructs the value at `handle` and returns its block to the
    /// allocator. Returns whether anything was freed (a stale handle is a
    /// silent no-op, mirroring [`HandleSet::free`]'s contract).
    pub fn free(&mut self, handle: Handle) -> bool {
        if !self.handles.is_alive(handle) {
            return false;
        }
        let index = handle.index() as usize;
        if let Some(block) = self.table.get_mut(index).and_then(Option::take) {
            // SAFETY: the slot held a live, constructed `T`; we are the
            // sole owner removing it exactly once.
            unsafe { block.as_ptr().drop_in_place() };
            self.allocator.free(block.as_ptr().cast::<u8>());
        }
        self.handles.free(handle)
    }

    /// Iterates every currently live `(handle, &T)` pair in ascending
    /// handle-index order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> + '_ {
        self.handles.iter().map(|h| {
            let block = self.table[h.index() as usize].expect("live handle with empty table slot");
            // SAFETY: see `get`.
            (h, unsafe { block.as_ref() })
        })
    }
}

impl<T> Drop for HandleObjectPool<T> {
    fn drop(&mut self) {
        for slot in self.table.drain(..) {
            if let Some(block) = slot {
                // SAFETY: every remaining slot holds a live, constructed
                // `T`; the pool (and its allocator) is being torn down.
                unsafe { block.as_ptr().drop_in_place() };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_then_get_round_trips() {
        let mut pool = HandleObjectPool::<u64>::new(4);
        let h = pool.malloc(42);
        assert_eq!(*pool.get(h).unwrap(), 42);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn free_invalidates_the_handle() {
        let mut pool = HandleObjectPool::<u64>::new(4);
        let h = pool.malloc(1);
        assert!(pool.free(h));
        assert!(pool.get(h).is_none());
        assert!(!pool.free(h));
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn freed_index_is_reused_with_a_new_handle() {
        let mut pool = HandleObjectPool::<u64>::new(4);
        let a = pool.malloc(1);
        pool.free(a);
        let b = pool.malloc(2);
        assert_eq!(a.index(), b.index());
        assert_ne!(a.version(), b.version());
        assert_eq!(*pool.get(b).unwrap(), 2);
    }

    #[test]
    fn iter_yields_ascending_live_handles() {
        let mut pool = HandleObjectPool::<u32>::new(4);
        let a = pool.malloc(10);
        let b = pool.malloc(20);
        let c = pool.malloc(30);
        pool.free(b);

        let seen: Vec<(u32, u32)> = pool.iter().map(|(h, v)| (h.index(), *v)).collect();
        assert_eq!(seen, vec![(a.index(), 10), (c.index(), 30)]);
    }

    #[test]
    fn drop_destructs_remaining_values() {
        use std::rc::Rc;
        let counter = Rc::new(());
        {
            let mut pool = HandleObjectPool::<Rc<()>>::new(4);
            pool.malloc(counter.clone());
            pool.malloc(counter.clone());
            assert_eq!(Rc::strong_count(&counter), 3);
        }
        assert_eq!(Rc::strong_count(&counter), 1);
    }

    #[test]
    fn mutation_through_get_mut_is_visible() {
        let mut pool = HandleObjectPool::<u32>::new(4);
        let h = pool.malloc(1);
        *pool.get_mut(h).unwrap() += 41;
        assert_eq!(*pool.get(h).unwrap(), 42);
    }
}
