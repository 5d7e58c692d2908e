//! Process-registered services identified by their own Rust type (spec
//! §4.6, "subsystem registry").
//!
//! Grounded in `original_source/source/core/subsystem.hpp`
//! (`SubsystemContext::add_subsystem`/`get_subsystem`/`remove_subsystem`/
//! `has_subsystems`): a `TypeId`-keyed map of owning pointers, with
//! `initialize`/`dispose` lifecycle hooks run at insertion/removal time.
//! A subsystem that fails to initialize is never inserted.

use core::any::Any;

use talon_os::sync::Mutex;

use crate::error::{fatal, FatalError};
use crate::typeid::{type_id_of, SubsystemMarker};

/// Lifecycle hooks a process-registered service implements.
///
/// `initialize` returning `false` aborts `SubsystemRegistry::add` with a
/// [`FatalError::SubsystemInitFailed`] (spec §7: setup failure is
/// reported by returning `false`, and the host aborts startup on it —
/// here "the host" is `add` itself, matching scenario S6's expectation
/// that a failed `add_subsystem` leaves the registry untouched).
pub trait Subsystem: Any {
    /// Runs once, immediately after construction and before the
    /// subsystem becomes visible to `get`. Returning `false` is a setup
    /// failure.
    fn initialize(&mut self) -> bool {
        true
    }

    /// Runs once, immediately before the subsystem is dropped by
    /// [`SubsystemRegistry::remove`].
    fn dispose(&mut self) {}

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Implements the `as_any`/`as_any_mut` boilerplate for a type that only
/// overrides `initialize`/`dispose`. Mirrors the convenience the
/// original gets for free from a single virtual base.
#[macro_export]
macro_rules! impl_subsystem_any {
    ($ty:ty) => {
        fn as_any(&self) -> &dyn ::core::any::Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn ::core::any::Any {
            self
        }
    };
}

/// A `TypeId`-keyed map of owning `Box<dyn Subsystem>`s.
///
/// Mutation (`add`/`remove`) is meant for single-threaded setup/teardown
/// (spec §5); `get` is safe to call during steady state from the owning
/// thread. The map is behind a `Mutex` only so a `Registry` can be
/// shared the same way `Scheduler` is, not because concurrent mutation
/// is supported — callers still must not `add`/`remove` concurrently
/// with `get` on another thread.
#[derive(Default)]
pub struct SubsystemRegistry {
    subsystems: Mutex<std::collections::HashMap<u32, Box<dyn Subsystem>>>,
}

impl SubsystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs `sys`, runs `initialize`, and inserts it. Fatal if `S`
    /// is already registered, or if `initialize` returns `false` — in
    /// the latter case the registry is left exactly as it was (scenario
    /// S6: a failed `add_subsystem::<B>` must not block a later,
    /// successful `add_subsystem::<A>(); add_subsystem::<B>();`).
    pub fn add<S: Subsystem + 'static>(&self, mut sys: S) {
        let id = type_id_of::<SubsystemMarker, S>();
        let mut subsystems = self.subsystems.lock().unwrap();
        if subsystems.contains_key(&id) {
            fatal!(FatalError::DuplicateSubsystem {
                type_name: core::any::type_name::<S>(),
            });
        }

        if !sys.initialize() {
            fatal!(FatalError::SubsystemInitFailed {
                type_name: core::any::type_name::<S>(),
            });
        }

        subsystems.insert(id, Box::new(sys));
    }

    /// Runs `dispose` and drops `S`, if registered. No-op otherwise.
    pub fn remove<S: Subsystem + 'static>(&self) {
        let id = type_id_of::<SubsystemMarker, S>();
        let removed = self.subsystems.lock().unwrap().remove(&id);
        if let Some(mut sys) = removed {
            sys.dispose();
        }
    }

    /// `true` iff `S` is currently registered.
    pub fn has<S: Subsystem + 'static>(&self) -> bool {
        let id = type_id_of::<SubsystemMarker, S>();
        self.subsystems.lock().unwrap().contains_key(&id)
    }

    /// Runs `f` with a reference to `S`, or returns `None` if it is not
    /// registered. A borrowed accessor rather than a returned `&S` keeps
    /// the registry's internal `Mutex` guard from leaking past this call.
    pub fn with<S: Subsystem + 'static, R>(&self, f: impl FnOnce(&S) -> R) -> Option<R> {
        let id = type_id_of::<SubsystemMarker, S>();
        let subsystems = self.subsystems.lock().unwrap();
        subsystems.get(&id).map(|sys| {
            let sys = sys
                .as_any()
                .downcast_ref::<S>()
                .expect("type id / subsystem type mismatch");
            f(sys)
        })
    }

    /// Like [`Self::with`] but with a mutable reference.
    pub fn with_mut<S: Subsystem + 'static, R>(&self, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        let id = type_id_of::<SubsystemMarker, S>();
        let mut subsystems = self.subsystems.lock().unwrap();
        subsystems.get_mut(&id).map(|sys| {
            let sys = sys
                .as_any_mut()
                .downcast_mut::<S>()
                .expect("type id / subsystem type mismatch");
            f(sys)
        })
    }

    /// All-of check over a tuple of subsystem types (spec §4.6:
    /// `has<S1, S2, ...>()`). `reg.has_all::<(A, B)>()` is `true` iff both
    /// `A` and `B` are currently registered; `reg.has::<A>()` remains the
    /// single-type shorthand.
    pub fn has_all<S: SubsystemSet>(&self) -> bool {
        S::all_registered(self)
    }
}

/// A tuple of subsystem types checkable in one [`SubsystemRegistry::has_all`]
/// call. Implemented for tuples of up to four types; a wider check should
/// be split into several `has::<S>()` calls.
pub trait SubsystemSet {
    fn all_registered(registry: &SubsystemRegistry) -> bool;
}

macro_rules! impl_subsystem_set {
    ($($t:ident),+) => {
        impl<$($t: Subsystem + 'static),+> SubsystemSet for ($($t,)+) {
            fn all_registered(registry: &SubsystemRegistry) -> bool {
                $(registry.has::<$t>())&&+
            }
        }
    };
}

impl_subsystem_set!(A);
impl_subsystem_set!(A, B);
impl_subsystem_set!(A, B, C);
impl_subsystem_set!(A, B, C, D);
