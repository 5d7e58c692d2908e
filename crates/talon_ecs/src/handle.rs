//! Versioned `(index, version)` identifiers and the pool that mints and
//! recycles them.
//!
//! Grounded in `original_source/source/codebase/handle_set.hpp`
//! (`HandleSet<T>`): an odd version means "currently alive"; freeing bumps
//! the version to even and returns the index to a LIFO free list so that
//! recently-freed slots are reused first (cache locality of recent
//! allocations, Invariant V3).

use core::fmt;

use crate::error::{fatal, FatalError};

/// A 32-bit versioned identifier in place of a raw pointer.
///
/// Two handles compare equal iff both `index` and `version` match.
/// [`Handle::INVALID`] is the all-ones sentinel; it is never returned by
/// [`HandleSet::create`] and is never "alive".
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    version: u32,
}

impl Handle {
    /// The sentinel handle: both fields are `u32::MAX`. Used as the `end()`
    /// of a [`crate::world::View`] and never minted by a live `HandleSet`.
    pub const INVALID: Handle = Handle {
        index: u32::MAX,
        version: u32::MAX,
    };

    pub(crate) const fn new(index: u32, version: u32) -> Self {
        Self { index, version }
    }

    /// The dense slot index this handle was minted at.
    #[inline]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// The version this handle was minted with. Odd iff the handle was
    /// alive at the moment it was created.
    #[inline]
    pub const fn version(&self) -> u32 {
        self.version
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Handle::INVALID {
            write!(f, "Handle(INVALID)")
        } else {
            write!(f, "Handle({}#{})", self.index, self.version)
        }
    }
}

impl Default for Handle {
    /// Defaults to [`Handle::INVALID`], not a freshly allocated handle.
    fn default() -> Self {
        Handle::INVALID
    }
}

/// An ordered sequence of version counters plus a LIFO free list.
///
/// **Invariant V1**: for every index `i`, `versions[i]` is odd iff a live
/// handle with that index currently exists.
/// **Invariant V2**: `create` flips the least-significant bit 0→1;
/// `free` flips it 1→0; a version that would overflow past `u32::MAX` is
/// a fatal error (see `DESIGN.md` for the reasoning against wrapping).
/// **Invariant V3**: free indices are reused LIFO.
#[derive(Default)]
pub struct HandleSet {
    versions: Vec<u32>,
    free: Vec<u32>,
}

impl HandleSet {
    /// Creates an empty handle pool.
    pub fn new() -> Self {
        Self {
            versions: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Allocates a fresh handle.
    ///
    /// Reuses the most recently freed index when the free list is
    /// non-empty; otherwise appends a new index with version 1.
    ///
    /// Fatal if the index space is exhausted (`index_max` is `u32::MAX -
    /// 1`, reserving `u32::MAX` for [`Handle::INVALID`]) or if the
    /// recycled index's version would overflow past `u32::MAX`.
    pub fn create(&mut self) -> Handle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.versions[index as usize];
            *slot = slot.checked_add(1).unwrap_or_else(|| {
                fatal!(FatalError::VersionOverflow {
                    what: "HandleSet",
                    count: *slot,
                })
            });
            return Handle::new(index, *slot);
        }

        let index = u32::try_from(self.versions.len()).unwrap_or_else(|_| {
            fatal!(FatalError::AllocatorExhausted {
                allocator: "HandleSet",
                element: "Handle",
                capacity: u32::MAX as usize - 1,
            })
        });
        if index >= u32::MAX - 1 {
            fatal!(FatalError::AllocatorExhausted {
                allocator: "HandleSet",
                element: "Handle",
                capacity: u32::MAX as usize - 1,
            });
        }
        self.versions.push(1);
        Handle::new(index, 1)
    }

    /// Frees `h` if it is currently alive, returning whether anything was
    /// freed. A stale or already-dead handle is a silent no-op — never
    /// fatal (spec §7: stale handles are "not found", not an error).
    pub fn free(&mut self, h: Handle) -> bool {
        if !self.is_alive(h) {
            return false;
        }
        let slot = &mut self.versions[h.index as usize];
        *slot = slot.checked_add(1).unwrap_or_else(|| {
            fatal!(FatalError::VersionOverflow {
                what: "HandleSet",
                count: *slot,
            })
        });
        self.free.push(h.index);
        true
    }

    /// `true` iff `h.index` is in range, its stored version matches
    /// `h.version`, and that version is odd.
    #[inline]
    pub fn is_alive(&self, h: Handle) -> bool {
        self.versions
            .get(h.index as usize)
            .is_some_and(|&v| v == h.version && v & 1 == 1)
    }

    /// The version currently stored at `index`, or `Handle::INVALID`'s
    /// version sentinel if `index` has never been allocated.
    pub fn get_version(&self, index: u32) -> u32 {
        self.versions
            .get(index as usize)
            .copied()
            .unwrap_or(Handle::INVALID.version)
    }

    /// Number of currently alive handles.
    pub fn size(&self) -> usize {
        self.versions.len() - self.free.len()
    }

    /// Total number of indices ever allocated (alive + freed).
    pub fn capacity(&self) -> usize {
        self.versions.len()
    }

    /// Iterates every currently alive handle in ascending index order.
    ///
    /// Safe to free the just-yielded handle mid-iteration (it simply
    /// won't be visited again); inserting new handles while iterating is
    /// not supported and may skip or repeat indices, since iteration
    /// walks a live snapshot of `versions.len()` taken at `next()` time
    /// only implicitly through the growing slice — callers should treat
    /// concurrent `create` during iteration as unspecified.
    pub fn iter(&self) -> impl Iterator<Item = Handle> + '_ {
        self.versions
            .iter()
            .enumerate()
            .filter(|(_, &v)| v & 1 == 1)
            .map(|(i, &v)| Handle::new(i as u32, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_handles_have_odd_version_and_are_alive() {
        let mut set = HandleSet::new();
        let h = set.create();
        assert_eq!(h.version() & 1, 1);
        assert!(set.is_alive(h));
    }

    #[test]
    fn free_then_recreate_reuses_index_with_new_version() {
        let mut set = HandleSet::new();
        let h1 = set.create();
        assert!(set.free(h1));
        assert!(!set.is_alive(h1));

        let h2 = set.create();
        assert_eq!(h2.index(), h1.index());
        assert_ne!(h2.version(), h1.version());
        assert!(set.is_alive(h2));
        assert!(!set.is_alive(h1));
    }

    #[test]
    fn free_is_idempotent_and_never_fatal_on_stale_handle() {
        let mut set = HandleSet::new();
        let h = set.create();
        assert!(set.free(h));
        assert!(!set.free(h));
    }

    #[test]
    fn lifo_reuse_order() {
        let mut set = HandleSet::new();
        let a = set.create();
        let b = set.create();
        set.free(a);
        set.free(b);
        // b was freed last, so it is reused first.
        let c = set.create();
        assert_eq!(c.index(), b.index());
    }

    #[test]
    fn iter_yields_ascending_live_handles() {
        let mut set = HandleSet::new();
        let a = set.create();
        let b = set.create();
        let c = set.create();
        set.free(b);
        let alive: Vec<_> = set.iter().map(|h| h.index()).collect();
        assert_eq!(alive, vec![a.index(), c.index()]);
    }

    #[test]
    fn out_of_bounds_index_reports_invalid_version() {
        let set = HandleSet::new();
        assert_eq!(set.get_version(42), Handle::INVALID.version());
    }

    #[test]
    fn size_and_capacity_track_live_and_total() {
        let mut set = HandleSet::new();
        let a = set.create();
        let _b = set.create();
        assert_eq!(set.size(), 2);
        assert_eq!(set.capacity(), 2);
        set.free(a);
        assert_eq!(set.size(), 1);
        assert_eq!(set.capacity(), 2);
    }

    mod proptests {
        use std::collections::HashSet;

        use proptest::prelude::*;

        use super::*;

        #[derive(Debug, Clone)]
        enum Op {
            Create,
            /// Frees the `n`th currently-live handle (by creation order
            /// among survivors), if any exist.
            FreeNth(usize),
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![
                3 => Just(Op::Create),
                1 => (0usize..8).prop_map(Op::FreeNth),
            ]
        }

        proptest! {
            /// Invariant 1 (spec §8): at every point, no two live handles
            /// share `(index, version)`, every live handle has an odd
            /// version, and every free index has an even version.
            #[test]
            fn handle_uniqueness(ops in prop::collection::vec(op_strategy(), 1..200)) {
                let mut set = HandleSet::new();
                let mut live: Vec<Handle> = Vec::new();

                for op in ops {
                    match op {
                        Op::Create => live.push(set.create()),
                        Op::FreeNth(n) => {
                            if !live.is_empty() {
                                let h = live.remove(n % live.len());
                                prop_assert!(set.free(h));
                            }
                        }
                    }

                    let mut seen = HashSet::new();
                    for &h in &live {
                        prop_assert!(set.is_alive(h));
                        prop_assert_eq!(h.version() & 1, 1);
                        prop_assert!(seen.insert((h.index(), h.version())), "duplicate live (index, version)");
                    }
                    for index in 0..set.capacity() as u32 {
                        let still_live = live.iter().any(|h| h.index() == index);
                        if !still_live {
                            prop_assert_eq!(set.get_version(index) & 1, 0, "freed index has odd version");
                        }
                    }
                }
            }
        }
    }
}
