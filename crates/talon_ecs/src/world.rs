//! [`World`]: entity handles, per-component-type [`SparseComponentStore`]s,
//! per-entity component masks, and mask-filtered iteration.
//!
//! Grounded in `original_source/source/core/private/ecs.hpp`
//! (`EntityManager`): entities are [`Handle`]s drawn from a single
//! [`HandleSet`]; each entity carries a bitmask of attached component
//! type ids; `find_entities_with<T...>` checks the mask before ever
//! touching a per-type store, so entities that cannot possibly match
//! never pay for a sparse-store lookup.

use std::collections::HashMap;

use fixedbitset::FixedBitSet;

use crate::component::{component_type_id, ComponentTypeId, ErasedStore, SparseComponentStore};
use crate::error::{fatal, FatalError};
use crate::event::EventBus;
pub use crate::event::{ComponentAdded, ComponentRemoved};
use crate::handle::{Handle, HandleSet};

struct TypeInfo {
    type_name: &'static str,
}

/// Entities, their component masks, and one [`SparseComponentStore`] per
/// registered component type.
///
/// Not `Sync`: every mutating method takes `&mut self`. Spec §5 requires
/// all ECS mutation to happen on a single thread or be externally
/// serialized; read-only queries of a stable snapshot from multiple
/// threads would be sound but are not exposed here since `World` itself
/// is `!Sync` (it holds raw pointers behind its stores).
pub struct World {
    entities: HandleSet,
    masks: Vec<FixedBitSet>,
    stores: HashMap<ComponentTypeId, Box<dyn ErasedStore>>,
    type_info: HashMap<ComponentTypeId, TypeInfo>,
    events: EventBus,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            entities: HandleSet::new(),
            masks: Vec::new(),
            stores: HashMap::new(),
            type_info: HashMap::new(),
            events: EventBus::new(),
        }
    }

    /// The embedded event bus. `add_component`/`remove_component`/
    /// `recycle` publish [`ComponentAdded`]/[`ComponentRemoved`] here;
    /// applications may also use it for their own events.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Number of currently alive entities.
    pub fn len(&self) -> usize {
        self.entities.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocates a fresh entity handle, extending the mask table as
    /// needed.
    pub fn create_entity(&mut self) -> Handle {
        let handle = self.entities.create();
        self.ensure_mask_slot(handle.index());
        handle
    }

    fn ensure_mask_slot(&mut self, index: u32) {
        if self.masks.len() <= index as usize {
            self.masks.resize_with(index as usize + 1, FixedBitSet::new);
        }
    }

    fn mask(&self, index: u32) -> Option<&FixedBitSet> {
        self.masks.get(index as usize)
    }

    fn mask_mut(&mut self, index: u32) -> &mut FixedBitSet {
        self.ensure_mask_slot(index);
        &mut self.masks[index as usize]
    }

    fn set_bit(&mut self, index: u32, bit: ComponentTypeId) {
        let mask = self.mask_mut(index);
        if mask.len() <= bit as usize {
            mask.grow(bit as usize + 1);
        }
        mask.insert(bit as usize);
    }

    /// `true` iff `h` is alive.
    pub fn is_alive(&self, h: Handle) -> bool {
        self.entities.is_alive(h)
    }

    /// The bitset of component type ids currently attached to `h`, or
    /// `None` if `h` is not alive.
    pub fn components_mask(&self, h: Handle) -> Option<&FixedBitSet> {
        if !self.is_alive(h) {
            return None;
        }
        self.mask(h.index())
    }

    /// For every bit set in `h`'s mask, removes the component from its
    /// store (running the destructor and publishing
    /// [`ComponentRemoved`]), clears the mask, then frees the handle.
    /// Silent no-op if `h` is not alive (spec §7: stale handles are
    /// never fatal).
    pub fn recycle(&mut self, h: Handle) {
        if !self.is_alive(h) {
            return;
        }

        // Ascending type-id order, matching the mask iteration order used
        // for Invariant W2.
        let mut set_bits: Vec<ComponentTypeId> = self
            .mask(h.index())
            .map(|m| m.ones().map(|b| b as ComponentTypeId).collect())
            .unwrap_or_default();
        set_bits.sort_unstable();

        for bit in set_bits {
            if let Some(store) = self.stores.get(&bit) {
                store.notify_removed(&self.events, h);
            }
            if let Some(store) = self.stores.get_mut(&bit) {
                store.remove_erased(h.index());
            }
        }

        if let Some(mask) = self.masks.get_mut(h.index() as usize) {
            mask.clear();
        }

        self.entities.free(h);
    }

    /// Assigns `T` a [`ComponentTypeId`] (if it doesn't have one yet) and
    /// ensures a [`SparseComponentStore<T>`] exists for it, growing in
    /// chunks of `chunk_size` elements. Calling this more than once for
    /// the same `T` is a no-op (the existing store and chunk size are
    /// kept).
    pub fn register_component<T: 'static>(&mut self, chunk_size: usize) {
        let id = component_type_id::<T>();
        self.stores
            .entry(id)
            .or_insert_with(|| Box::new(SparseComponentStore::<T>::new(chunk_size)));
        self.type_info.entry(id).or_insert(TypeInfo {
            type_name: core::any::type_name::<T>(),
        });
    }

    fn store_mut<T: 'static>(&mut self) -> &mut SparseComponentStore<T> {
        let id = component_type_id::<T>();
        let store = self.stores.get_mut(&id).unwrap_or_else(|| {
            fatal!(FatalError::ComponentNotRegistered {
                type_name: core::any::type_name::<T>(),
            })
        });
        store
            .as_any_mut()
            .downcast_mut::<SparseComponentStore<T>>()
            .expect("component type id / store type mismatch")
    }

    fn store<T: 'static>(&self) -> Option<&SparseComponentStore<T>> {
        let id = component_type_id::<T>();
        self.stores
            .get(&id)
            .map(|s| s.as_any().downcast_ref::<SparseComponentStore<T>>().expect("component type id / store type mismatch"))
    }

    /// Attaches `value` as `h`'s `T` component. `T` must already be
    /// registered via [`Self::register_component`]. Returns `None` (no
    /// effect) if `h` is not alive. Fatal if `T` is already attached to
    /// `h` (spec §4.3: the store does not deduplicate; the caller —
    /// `World` — must reject a double-attach) or if `T` was never
    /// registered.
    pub fn add_component<T: 'static>(&mut self, h: Handle, value: T) -> Option<&mut T> {
        if !self.is_alive(h) {
            return None;
        }

        let id = component_type_id::<T>();
        if self.mask(h.index()).is_some_and(|m| m.contains(id as usize)) {
            fatal!(FatalError::DoubleComponentAttach {
                type_name: core::any::type_name::<T>(),
                entity: h,
            });
        }

        let ptr = self.store_mut::<T>().insert_uninit(h.index());
        // SAFETY: `insert_uninit` returns a fresh, uninitialized block
        // sized for `T` from a store registered for `T`.
        unsafe { ptr.write(value) };
        self.set_bit(h.index(), id);

        self.events.emit(&ComponentAdded::<T>::new(h));
        // SAFETY: just written above, and the mapping was just
        // registered in the store, so this is the same live block.
        Some(unsafe { &mut *ptr })
    }

    /// Read-only access to `h`'s `T` component, or `None` if `h` is not
    /// alive, `T` is not attached, or `T` was never registered.
    pub fn get_component<T: 'static>(&self, h: Handle) -> Option<&T> {
        if !self.is_alive(h) {
            return None;
        }
        let ptr = self.store::<T>()?.get(h.index())?;
        // SAFETY: the store only returns pointers to live, constructed
        // `T`s (`insert_uninit` is always immediately followed by a
        // write in `add_component`).
        Some(unsafe { &*ptr })
    }

    /// Mutable access to `h`'s `T` component, or `None` under the same
    /// conditions as [`Self::get_component`].
    pub fn get_component_mut<T: 'static>(&mut self, h: Handle) -> Option<&mut T> {
        if !self.is_alive(h) {
            return None;
        }
        let ptr = self.store::<T>()?.get(h.index())?;
        // SAFETY: see `get_component`; `&mut self` guarantees no other
        // borrow of this store is live.
        Some(unsafe { &mut *ptr })
    }

    /// If `T` is attached to `h`, publishes [`ComponentRemoved`], clears
    /// the mask bit, and removes it from its store (running the
    /// destructor). No-op otherwise.
    pub fn remove_component<T: 'static>(&mut self, h: Handle) {
        if !self.is_alive(h) {
            return;
        }
        let id = component_type_id::<T>();
        if !self.mask(h.index()).is_some_and(|m| m.contains(id as usize)) {
            return;
        }

        self.events.emit(&ComponentRemoved::<T>::new(h));
        if let Some(mask) = self.masks.get_mut(h.index() as usize) {
            mask.set(id as usize, false);
        }
        self.store_mut::<T>().remove(h.index());
    }

    /// A lazy view over every live entity whose mask is a superset of
    /// `Q`'s required component set.
    pub fn find_entities_with<'w, Q: ComponentQuery<'w>>(&'w self) -> View<'w, Q> {
        View::new(self)
    }

    /// Internal: raw pointer to `T`'s component at `index`, used by
    /// [`ComponentQuery`] tuple impls to fetch without holding a typed
    /// borrow of `self.stores` across the whole tuple.
    fn raw_get<T: 'static>(&self, index: u32) -> Option<*mut T> {
        self.store::<T>()?.get(index)
    }

    fn type_name_of(&self, id: ComponentTypeId) -> &'static str {
        self.type_info.get(&id).map(|info| info.type_name).unwrap_or("<unknown>")
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entities_alive", &self.len())
            .field(
                "component_types",
                &self.type_info.keys().map(|id| self.type_name_of(*id)).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// A tuple of `&'w T` component references fetchable from a [`World`] in
/// one pass. Implemented for tuples of up to four component types; a
/// query with more types than that should be split into nested
/// `visit`/`begin`/`next` calls.
pub trait ComponentQuery<'w>: Sized {
    /// The component type ids every matching entity's mask must contain.
    fn required_ids() -> Vec<ComponentTypeId>;

    /// # Safety
    /// `index` must currently hold every component type in
    /// [`Self::required_ids`] in `world`'s stores.
    unsafe fn fetch(world: &'w World, index: u32) -> Self;
}

macro_rules! impl_component_query {
    ($($t:ident),+) => {
        impl<'w, $($t: 'static),+> ComponentQuery<'w> for ($(&'w $t,)+) {
            fn required_ids() -> Vec<ComponentTypeId> {
                vec![$(component_type_id::<$t>()),+]
            }

            unsafe fn fetch(world: &'w World, index: u32) -> Self {
                (
                    $(
                        // SAFETY: caller guarantees every required id is
                        // present at `index`, per this fn's own contract.
                        unsafe {
                            &*world
                                .raw_get::<$t>(index)
                                .expect("ComponentQuery::fetch: mask said present but store disagreed")
                        },
                    )+
                )
            }
        }
    };
}

impl_component_query!(A);
impl_component_query!(A, B);
impl_component_query!(A, B, C);
impl_component_query!(A, B, C, D);

/// A lazy, mask-filtered iterator over live entities, yielded in
/// ascending index order (spec §4.4).
///
/// Iterating is safe across `recycle`/`add_component`/`remove_component`
/// calls on *other* component stores, but recycling the entity currently
/// being visited is undefined behavior (spec §4.4's "undefined behavior
/// if an entity is recycled during iteration").
pub struct View<'w, Q> {
    world: &'w World,
    required: FixedBitSet,
    next_index: u32,
    _marker: core::marker::PhantomData<fn() -> Q>,
}

impl<'w, Q: ComponentQuery<'w>> View<'w, Q> {
    fn new(world: &'w World) -> Self {
        let ids = Q::required_ids();
        let mut required = FixedBitSet::new();
        for id in ids {
            if required.len() <= id as usize {
                required.grow(id as usize + 1);
            }
            required.insert(id as usize);
        }
        Self {
            world,
            required,
            next_index: 0,
            _marker: core::marker::PhantomData,
        }
    }

    fn matches(&self, index: u32) -> bool {
        let Some(mask) = self.world.mask(index) else {
            return false;
        };
        self.required.ones().all(|bit| mask.contains(bit))
    }

    /// The first live handle whose mask is a superset of the required
    /// set, or [`Handle::INVALID`] if none match.
    pub fn begin(&mut self) -> Handle {
        self.next_index = 0;
        self.advance()
    }

    fn advance(&mut self) -> Handle {
        while (self.next_index as usize) < self.world.masks.len() {
            let index = self.next_index;
            self.next_index += 1;
            let version = self.world.entities.get_version(index);
            if version & 1 == 1 && self.matches(index) {
                return Handle::new(index, version);
            }
        }
        Handle::INVALID
    }

    /// Total number of currently matching live entities. Consumes the
    /// view's internal cursor (re-`begin`s afterward is unnecessary
    /// since `count` is typically the last call on a view).
    pub fn count(mut self) -> usize {
        self.next_index = 0;
        let mut n = 0;
        while self.advance() != Handle::INVALID {
            n += 1;
        }
        n
    }

    /// Invokes `f(handle, components...)` for every currently matching
    /// live entity, ascending by index.
    pub fn visit(mut self, mut f: impl FnMut(Handle, Q)) {
        self.next_index = 0;
        loop {
            let h = self.advance();
            if h == Handle::INVALID {
                break;
            }
            // SAFETY: `matches` (called from `advance`) confirmed every
            // required id is set in this entity's mask, and a set mask
            // bit is only ever true while the corresponding store holds
            // a live, constructed component (Invariant W1).
            let item = unsafe { Q::fetch(self.world, h.index()) };
            f(h, item);
        }
    }
}

impl<'w, Q: ComponentQuery<'w>> Iterator for View<'w, Q> {
    type Item = Handle;

    fn next(&mut self) -> Option<Handle> {
        let h = self.advance();
        if h == Handle::INVALID {
            None
        } else {
            Some(h)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pos {
        x: f32,
        y: f32,
    }

    struct Tag;

    #[test]
    fn s1_entity_lifecycle() {
        let mut world = World::new();
        world.register_component::<Pos>(16);

        let e1 = world.create_entity();
        let e2 = world.create_entity();
        let e3 = world.create_entity();

        world.add_component(e1, Pos { x: 1.0, y: 2.0 });
        world.add_component(e2, Pos { x: 3.0, y: 4.0 });

        assert_eq!(world.find_entities_with::<(&Pos,)>().count(), 2);
        assert!(world.components_mask(e3).unwrap().count_ones(..) == 0);

        world.recycle(e1);
        assert_eq!(world.find_entities_with::<(&Pos,)>().count(), 1);
        assert!(world.get_component::<Pos>(e1).is_none());
        assert!(!world.is_alive(e1));

        let e4 = world.create_entity();
        assert_eq!(e4.index(), e1.index());
        assert_ne!(e4.version(), e1.version());
    }

    #[test]
    fn s2_sparse_to_dense_spill() {
        let mut world = World::new();
        world.register_component::<Tag>(8);

        let entities: Vec<Handle> = (0..20).map(|_| world.create_entity()).collect();
        for &i in &[0usize, 3, 5, 7, 9, 11, 13, 15] {
            world.add_component(entities[i], Tag);
        }
        // 9th insertion triggers the small -> dense spill.
        world.add_component(entities[17], Tag);

        for &i in &[0usize, 3, 5, 7, 9, 11, 13, 15, 17] {
            assert!(world.get_component::<Tag>(entities[i]).is_some());
        }
        for i in [1usize, 2, 4, 6, 8, 10, 12, 14, 16, 18, 19] {
            assert!(world.get_component::<Tag>(entities[i]).is_none());
        }

        world.remove_component::<Tag>(entities[5]);
        assert!(world.get_component::<Tag>(entities[5]).is_none());
        assert_eq!(world.find_entities_with::<(&Tag,)>().count(), 8);
    }

    #[test]
    fn mask_and_store_agree() {
        let mut world = World::new();
        world.register_component::<Pos>(4);
        let e = world.create_entity();
        assert!(world.get_component::<Pos>(e).is_none());

        world.add_component(e, Pos { x: 0.0, y: 0.0 });
        let id = component_type_id::<Pos>();
        assert!(world.components_mask(e).unwrap().contains(id as usize));
        assert!(world.get_component::<Pos>(e).is_some());

        world.remove_component::<Pos>(e);
        assert!(!world.components_mask(e).unwrap().contains(id as usize));
        assert!(world.get_component::<Pos>(e).is_none());
    }

    #[test]
    #[should_panic(expected = "already attached")]
    fn double_attach_is_fatal() {
        let mut world = World::new();
        world.register_component::<Pos>(4);
        let e = world.create_entity();
        world.add_component(e, Pos { x: 0.0, y: 0.0 });
        world.add_component(e, Pos { x: 1.0, y: 1.0 });
    }

    #[test]
    fn find_entities_with_two_components_visits_in_ascending_order() {
        struct Vel {
            dx: f32,
        }

        let mut world = World::new();
        world.register_component::<Pos>(4);
        world.register_component::<Vel>(4);

        let e0 = world.create_entity();
        let e1 = world.create_entity();
        let e2 = world.create_entity();

        world.add_component(e0, Pos { x: 0.0, y: 0.0 });
        world.add_component(e0, Vel { dx: 1.0 });
        world.add_component(e1, Pos { x: 1.0, y: 1.0 }); // no Vel
        world.add_component(e2, Pos { x: 2.0, y: 2.0 });
        world.add_component(e2, Vel { dx: 2.0 });

        let mut seen = Vec::new();
        world
            .find_entities_with::<(&Pos, &Vel)>()
            .visit(|h, (pos, vel)| seen.push((h.index(), pos.x, vel.dx)));

        assert_eq!(seen, vec![(e0.index(), 0.0, 1.0), (e2.index(), 2.0, 2.0)]);
    }

    #[test]
    fn component_lifecycle_events_fire() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let mut world = World::new();
        world.register_component::<Pos>(4);

        let added = Arc::new(AtomicU32::new(0));
        let removed = Arc::new(AtomicU32::new(0));
        let a = added.clone();
        let r = removed.clone();
        world.events().subscribe::<ComponentAdded<Pos>>(1, move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
        world.events().subscribe::<ComponentRemoved<Pos>>(2, move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });

        let e = world.create_entity();
        world.add_component(e, Pos { x: 0.0, y: 0.0 });
        assert_eq!(added.load(Ordering::SeqCst), 1);

        world.remove_component::<Pos>(e);
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }
}
