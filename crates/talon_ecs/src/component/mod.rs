//! Per-component-type storage, keyed by entity index.

mod store;

pub use store::{ErasedStore, SparseComponentStore};

/// A component's process-unique type id (spec §4.3: "stable,
/// process-unique 16-bit type id assigned on first use").
pub type ComponentTypeId = u16;

/// Assigns or looks up `T`'s [`ComponentTypeId`], fatal if the 16-bit id
/// space (65536 distinct component types) is exhausted.
pub fn component_type_id<T: 'static>() -> ComponentTypeId {
    let id = crate::typeid::type_id_of::<crate::typeid::ComponentMarker, T>();
    u16::try_from(id).unwrap_or_else(|_| {
        crate::error::fatal!(crate::error::FatalError::TypeIdOverflow {
            kind: "component",
            count: id as usize + 1,
        })
    })
}
