//! [`SparseComponentStore`]: entity-index → component-of-one-type, with a
//! small-set linear-scan mode that spills to a direct-indexed dense mode.
//!
//! Grounded in `original_source/source/core/private/ecs.hpp`'s
//! `ComponentStore<T>`: a fixed 8-slot `(index, block)` table scanned
//! linearly while sparse, spilling once a 9th distinct entity is attached
//! to a `Vec` sized to the largest entity index ever seen (`top`).
#![expect(unsafe_code, reason = "raw-pointer slab allocator")]

use core::any::Any;
use core::ptr::NonNull;

use talon_cfg::SMALL_SET_CAPACITY;

use crate::slab::FixedBlockAllocator;

enum Mode {
    /// Up to `SMALL_SET_CAPACITY` `(entity_index, block)` pairs, linearly
    /// scanned. `None` entries are holes left by `remove`.
    Small(Vec<Option<(u32, NonNull<u8>)>>),
    /// Directly indexed by entity index; `None` means "not present".
    Dense(Vec<Option<NonNull<u8>>>),
}

/// Per-component-type storage keyed by entity index.
///
/// **Invariant**: every live slot's block came from `allocator.malloc()`
/// and is released through `allocator.free()` exactly once, either from
/// `remove` or from `Drop`.
pub struct SparseComponentStore<T> {
    allocator: FixedBlockAllocator,
    mode: Mode,
    /// Largest entity index + 1 ever seen; bounds dense-mode growth.
    top: u32,
    _marker: core::marker::PhantomData<T>,
}

impl<T: 'static> SparseComponentStore<T> {
    /// Creates an empty store in small mode, with a slab sized to `T` and
    /// growing `chunk_size` elements at a time.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            allocator: FixedBlockAllocator::new(
                size_of::<T>(),
                align_of::<T>(),
                chunk_size.max(1),
                core::any::type_name::<T>(),
            ),
            mode: Mode::Small(Vec::new()),
            top: 0,
            _marker: core::marker::PhantomData,
        }
    }

    /// Number of components currently stored.
    pub fn len(&self) -> usize {
        self.allocator.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquires a fresh, uninitialized block for `index` and registers
    /// the mapping. Callers must construct a `T` into the returned
    /// pointer before any observer reads the component (spec §4.3 edge
    /// case). The caller (`World::add_component`) is responsible for
    /// rejecting a double-insert; this method does not deduplicate.
    pub fn insert_uninit(&mut self, index: u32) -> *mut T {
        self.top = self.top.max(index + 1);
        let block = self.allocator.malloc().cast::<T>();
        // SAFETY: `block` came from an allocator sized for `T`.
        let block = NonNull::new(block).expect("malloc returned null");

        let needs_spill = match &mut self.mode {
            Mode::Small(pairs) => {
                if let Some(slot) = pairs.iter_mut().find(|s| s.is_none()) {
                    *slot = Some((index, block.cast()));
                    false
                } else if pairs.len() < SMALL_SET_CAPACITY {
                    pairs.push(Some((index, block.cast())));
                    false
                } else {
                    true
                }
            }
            Mode::Dense(slots) => {
                if slots.len() <= index as usize {
                    slots.resize(self.top as usize, None);
                }
                slots[index as usize] = Some(block.cast());
                false
            }
        };

        if needs_spill {
            self.spill_to_dense(index, block.cast());
        }

        block.as_ptr()
    }

    fn spill_to_dense(&mut self, new_index: u32, new_block: NonNull<u8>) {
        let Mode::Small(pairs) = &self.mode else {
            unreachable!("spill_to_dense called outside small mode")
        };
        let mut slots = vec![None; self.top as usize];
        for &(idx, block) in pairs.iter().flatten() {
            slots[idx as usize] = Some(block);
        }
        slots[new_index as usize] = Some(new_block);
        self.mode = Mode::Dense(slots);
    }

    /// Constant-time lookup in dense mode; linear scan of the small-set
    /// table in small mode.
    pub fn get(&self, index: u32) -> Option<*mut T> {
        match &self.mode {
            Mode::Small(pairs) => pairs
                .iter()
                .flatten()
                .find(|(idx, _)| *idx == index)
                .map(|(_, block)| block.cast::<T>().as_ptr()),
            Mode::Dense(slots) => slots
                .get(index as usize)
                .copied()
                .flatten()
                .map(|block| block.cast::<T>().as_ptr()),
        }
    }

    pub fn contains(&self, index: u32) -> bool {
        self.get(index).is_some()
    }

    /// Drops the component at `index` (if present) and returns its block
    /// to the allocator. No-op if `index` is not present.
    pub fn remove(&mut self, index: u32) {
        let block = match &mut self.mode {
            Mode::Small(pairs) => pairs
                .iter_mut()
                .find(|s| matches!(s, Some((idx, _)) if *idx == index))
                .and_then(|s| s.take())
                .map(|(_, b)| b),
            Mode::Dense(slots) => slots.get_mut(index as usize).and_then(|s| s.take()),
        };
        let Some(block) = block else { return };
        // SAFETY: `block` was constructed as a live `T` by the caller of
        // `insert_uninit` before it became observable, and is removed
        // from the index exactly once here.
        unsafe { block.cast::<T>().as_ptr().drop_in_place() };
        self.allocator.free(block.as_ptr());
    }

    /// Iterates `(entity_index, *mut T)` for every currently stored
    /// component, ascending by index in dense mode; unspecified order in
    /// small mode (callers needing order should rely on the World's mask
    /// iteration, which is always ascending by entity index regardless
    /// of a single store's internal mode).
    pub fn iter(&self) -> impl Iterator<Item = (u32, *mut T)> + '_ {
        let small = match &self.mode {
            Mode::Small(pairs) => Some(pairs.iter().flatten()),
            Mode::Dense(_) => None,
        }
        .into_iter()
        .flatten()
        .map(|(idx, block)| (*idx, block.cast::<T>().as_ptr()));

        let dense = match &self.mode {
            Mode::Dense(slots) => Some(
                slots
                    .iter()
                    .enumerate()
                    .filter_map(|(i, s)| s.map(|b| (i as u32, b.cast::<T>().as_ptr()))),
            ),
            Mode::Small(_) => None,
        }
        .into_iter()
        .flatten();

        small.chain(dense)
    }
}

impl<T> Drop for SparseComponentStore<T> {
    fn drop(&mut self) {
        let blocks: Vec<NonNull<u8>> = match &self.mode {
            Mode::Small(pairs) => pairs.iter().flatten().map(|&(_, b)| b).collect(),
            Mode::Dense(slots) => slots.iter().flatten().copied().collect(),
        };
        for block in blocks {
            // SAFETY: every stored block holds a live, constructed `T`
            // until removed; we are dropping the whole store, so each
            // remaining block is dropped exactly once here.
            unsafe { block.cast::<T>().as_ptr().drop_in_place() };
            self.allocator.free(block.as_ptr());
        }
    }
}

/// Type-erased face of [`SparseComponentStore`], stored behind `Box<dyn
/// ErasedStore>` in `World`'s per-component-type registry so that
/// operations that only know a `ComponentTypeId` (not `T`) — `recycle`,
/// mask bookkeeping — can still destruct and free a component. This is
/// the Rust realization of the spec's "erased destructor closure": a
/// monomorphized `SparseComponentStore<T>::remove` already knows how to
/// drop `T`, so no separate function pointer needs to be threaded through.
pub trait ErasedStore: Any {
    fn remove_erased(&mut self, index: u32);
    fn contains_erased(&self, index: u32) -> bool;
    fn len_erased(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Publishes `ComponentRemoved<T>` on `events`, without touching the
    /// store itself. `World::recycle` calls this for every attached
    /// component type (knowing only the erased [`crate::component::ComponentTypeId`],
    /// never `T` directly) immediately before `remove_erased`, matching
    /// SPEC_FULL §7.2's "emitted before the destructor runs" ordering.
    fn notify_removed(&self, events: &crate::event::EventBus, entity: crate::handle::Handle);
}

impl<T: 'static> ErasedStore for SparseComponentStore<T> {
    fn remove_erased(&mut self, index: u32) {
        self.remove(index);
    }

    fn contains_erased(&self, index: u32) -> bool {
        self.contains(index)
    }

    fn len_erased(&self) -> usize {
        self.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn notify_removed(&self, events: &crate::event::EventBus, entity: crate::handle::Handle) {
        events.emit(&crate::event::ComponentRemoved::<T>::new(entity));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_insert_get_remove() {
        let mut store = SparseComponentStore::<u64>::new(4);
        let p = store.insert_uninit(3);
        unsafe { p.write(42) };
        assert_eq!(unsafe { *store.get(3).unwrap() }, 42);
        store.remove(3);
        assert!(store.get(3).is_none());
    }

    #[test]
    fn spills_to_dense_after_nine_distinct_entities() {
        let mut store = SparseComponentStore::<u32>::new(4);
        for i in [0u32, 3, 5, 7, 9, 11, 13, 15] {
            let p = store.insert_uninit(i);
            unsafe { p.write(i) };
        }
        // still small mode internally; 9th insertion triggers the spill.
        let p = store.insert_uninit(17);
        unsafe { p.write(17) };

        for i in [0u32, 3, 5, 7, 9, 11, 13, 15, 17] {
            assert_eq!(unsafe { *store.get(i).unwrap() }, i);
        }
        for i in [1u32, 2, 4, 6, 8, 10, 12, 14, 16, 18] {
            assert!(store.get(i).is_none());
        }

        store.remove(5);
        assert!(store.get(5).is_none());
        assert_eq!(store.len(), 8);
    }

    #[test]
    fn remove_of_absent_index_is_a_noop() {
        let mut store = SparseComponentStore::<u32>::new(4);
        store.remove(0); // never inserted
        assert_eq!(store.len(), 0);
    }

    mod proptests {
        use std::collections::HashMap;

        use proptest::prelude::*;

        use super::*;

        #[derive(Debug, Clone)]
        enum Op {
            Insert(u32, u32),
            Remove(u32),
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![
                3 => (0u32..40, any::<u32>()).prop_map(|(i, v)| Op::Insert(i, v)),
                1 => (0u32..40).prop_map(Op::Remove),
            ]
        }

        proptest! {
            /// Invariants 3 & 4 (spec §8): round-trip correctness and
            /// that every previously inserted pair stays reachable by its
            /// original index across the small-to-dense spill.
            #[test]
            fn sparse_store_matches_a_hashmap_model(ops in prop::collection::vec(op_strategy(), 1..300)) {
                let mut store = SparseComponentStore::<u32>::new(4);
                let mut model: HashMap<u32, u32> = HashMap::new();

                for op in ops {
                    match op {
                        Op::Insert(i, v) => {
                            if !model.contains_key(&i) {
                                let p = store.insert_uninit(i);
                                unsafe { p.write(v) };
                                model.insert(i, v);
                            }
                        }
                        Op::Remove(i) => {
                            store.remove(i);
                            model.remove(&i);
                        }
                    }

                    for (&i, &v) in &model {
                        let got = store.get(i);
                        prop_assert!(got.is_some());
                        prop_assert_eq!(unsafe { *got.unwrap() }, v);
                    }
                    prop_assert_eq!(store.len(), model.len());
                }
            }
        }
    }

    #[test]
    fn drop_destructs_remaining_components() {
        use std::rc::Rc;
        let counter = Rc::new(());
        {
            let mut store = SparseComponentStore::<Rc<()>>::new(4);
            let p = store.insert_uninit(0);
            unsafe { p.write(counter.clone()) };
            assert_eq!(Rc::strong_count(&counter), 2);
        }
        assert_eq!(Rc::strong_count(&counter), 1);
    }
}
