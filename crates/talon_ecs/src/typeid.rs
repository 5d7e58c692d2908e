//! Process-wide, dense, type-indexed id assignment (spec §4.5).
//!
//! The original assigns an id to each `(base class, derived class)` pair
//! on first reference, via a static counter templated on the base class.
//! Rust has no direct analogue of a per-template-instantiation static
//! member, but a `static` declared inside a generic function is
//! monomorphized once per distinct type parameter — so a zero-sized
//! *marker* type stands in for "base class" and gets its own counter and
//! map, entirely separate from every other marker's.

use core::any::TypeId;
use core::marker::PhantomData;

use talon_os::sync::Mutex;

/// Marker for the component type-id space (spec §4.3/§4.4: a 16-bit id
/// per attached component type).
pub struct ComponentMarker;

/// Marker for the subsystem type-id space (spec §4.6).
pub struct SubsystemMarker;

fn registry<Marker: 'static>() -> &'static Mutex<Vec<TypeId>> {
    // One copy of this static per monomorphization of `registry::<Marker>`,
    // i.e. one independent id sequence per marker type.
    static REGISTRY: talon_os::sync::OnceLock<Mutex<Vec<TypeId>>> = talon_os::sync::OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

/// Returns the dense, process-unique id for `T` within `Marker`'s id
/// space, assigning a new one (`registry.len()` at the time of
/// insertion) on first reference. Ids are stable for the process
/// lifetime and are never meaningful across processes.
pub fn type_id_of<Marker: 'static, T: 'static>() -> u32 {
    let reg = registry::<Marker>();
    let mut ids = reg.lock().unwrap();
    let tid = TypeId::of::<T>();
    if let Some(pos) = ids.iter().position(|&existing| existing == tid) {
        return pos as u32;
    }
    let id = ids.len() as u32;
    ids.push(tid);
    id
}

/// A lightweight handle onto one marker's id space, used where a caller
/// wants to query without spelling `type_id_of::<Marker, T>()` inline
/// (e.g. `World::register_component`, which looks up `ComponentMarker`
/// repeatedly for different `T`).
pub struct TypeIdSpace<Marker> {
    _marker: PhantomData<Marker>,
}

impl<Marker: 'static> TypeIdSpace<Marker> {
    pub const fn new() -> Self {
        Self { _marker: PhantomData }
    }

    pub fn id_of<T: 'static>(&self) -> u32 {
        type_id_of::<Marker, T>()
    }
}

impl<Marker: 'static> Default for TypeIdSpace<Marker> {
    fn default() -> Self {
        Self::new()
    }
}
