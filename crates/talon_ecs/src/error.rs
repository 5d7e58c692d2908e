//! Fatal-error taxonomy (spec §7: configuration faults and resource
//! exhaustion are unrecoverable locally; they log at `error!` and then
//! abort the process via `panic!`, never propagate as a `Result`).

use thiserror::Error;

/// A condition that indicates programmer error or resource exhaustion.
///
/// These never cross an API boundary as a `Result` — they are always
/// routed through [`fatal!`], which logs the `Display` message at
/// `error!` and then panics with it, so the diagnostic lands in both the
/// log subscriber and the panic payload.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FatalError {
    #[error("subsystem {type_name} is already registered")]
    DuplicateSubsystem { type_name: &'static str },

    #[error("subsystem {type_name}::initialize() returned false")]
    SubsystemInitFailed { type_name: &'static str },

    #[error("component {type_name} is already attached to entity {entity:?}")]
    DoubleComponentAttach {
        type_name: &'static str,
        entity: crate::handle::Handle,
    },

    #[error("component {type_name} was never registered via World::register_component")]
    ComponentNotRegistered { type_name: &'static str },

    #[error("component type id space ({kind}) exhausted after {count} registrations")]
    TypeIdOverflow { kind: &'static str, count: usize },

    #[error("{allocator} for `{element}` is out of indices (capacity {capacity} elements)")]
    AllocatorExhausted {
        allocator: &'static str,
        element: &'static str,
        capacity: usize,
    },

    #[error("{what} version counter overflowed after {count} allocations")]
    VersionOverflow { what: &'static str, count: u32 },
}

/// Logs `$err` at `error!` and then panics with it.
///
/// Reserved for [`FatalError`] conditions (spec §7): duplicate
/// registration, double component attach, type-id overflow, and slab /
/// index exhaustion. Never used for a stale-handle lookup, which is
/// always reported as `None`/`false` instead.
macro_rules! fatal {
    ($err:expr) => {{
        let err: $crate::error::FatalError = $err;
        ::log::error!("{err}");
        ::core::panic!("{err}");
    }};
}

pub(crate) use fatal;
