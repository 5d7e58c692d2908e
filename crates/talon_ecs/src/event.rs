//! Synchronous, type-indexed publish/subscribe (spec §4.6).
//!
//! Grounded in `original_source/source/event.hpp` (`EventDispatcher` /
//! `EventManager`): subscribers are stored per event type in an
//! insertion-ordered list; `emit` calls each subscriber's closure in
//! order, on the calling thread. A subscriber must not mutate the
//! subscriber list of the event type it is currently being dispatched
//! from — such changes are queued in a per-channel buffer and drained
//! once the outermost `emit` for that type returns (SPEC_FULL §9.2).

use core::any::{Any, TypeId};

use talon_os::sync::{Arc, Mutex};

/// Caller-supplied key identifying a subscription, used only to
/// unsubscribe later — it carries no other meaning to the bus.
pub type SubscriberKey = u64;

type Listener<E> = Box<dyn FnMut(&E) + Send>;

/// Emitted by [`crate::world::World::add_component`] after `T` is
/// constructed and its mask bit set, before the call returns
/// (SPEC_FULL §7.2, supplementing the distilled spec's event bus with
/// the original's `EvtComponentAdded<T>`).
pub struct ComponentAdded<T> {
    pub entity: crate::handle::Handle,
    _marker: core::marker::PhantomData<fn(&T)>,
}

impl<T> ComponentAdded<T> {
    pub(crate) fn new(entity: crate::handle::Handle) -> Self {
        Self {
            entity,
            _marker: core::marker::PhantomData,
        }
    }
}

/// Emitted by [`crate::world::World::remove_component`] and
/// [`crate::world::World::recycle`] before `T`'s destructor runs and its
/// mask bit clears (SPEC_FULL §7.2, `EvtComponentRemoved<T>`).
pub struct ComponentRemoved<T> {
    pub entity: crate::handle::Handle,
    _marker: core::marker::PhantomData<fn(&T)>,
}

impl<T> ComponentRemoved<T> {
    pub(crate) fn new(entity: crate::handle::Handle) -> Self {
        Self {
            entity,
            _marker: core::marker::PhantomData,
        }
    }
}

enum PendingOp<E> {
    Subscribe(SubscriberKey, Listener<E>),
    Unsubscribe(SubscriberKey),
}

/// One event type's subscriber list plus re-entrancy bookkeeping.
///
/// Guarded by its own `Mutex`, separate from the bus's top-level
/// channel-lookup map, so that dispatching `E` never holds a lock a
/// nested call for a *different* event type would need. Re-entrancy
/// for the *same* event type is handled by `depth`/`pending`: `emit`
/// lends the subscriber list out to the caller (via `mem::take`) and
/// drops this lock before invoking a single listener, so a listener
/// that calls back into `subscribe`/`unsubscribe`/`emit` for the same
/// `E` never contends with a lock this call already holds.
struct ChannelState<E> {
    subscribers: Vec<(SubscriberKey, Listener<E>)>,
    depth: u32,
    pending: Vec<PendingOp<E>>,
}

impl<E> Default for ChannelState<E> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
            depth: 0,
            pending: Vec::new(),
        }
    }
}

/// A type-indexed collection of per-event-type channels.
///
/// Subscribing, unsubscribing, and emitting all resolve the relevant
/// channel through a short-lived lock on `channels`, then do their
/// actual work through that channel's own lock — never both at once —
/// so that a subscriber calling back into the bus (for the same or a
/// different event type) cannot deadlock against a lock its own call
/// already holds.
#[derive(Default)]
pub struct EventBus {
    channels: Mutex<std::collections::HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel<E: 'static>(&self) -> Arc<Mutex<ChannelState<E>>> {
        let mut channels = self.channels.lock().unwrap();
        let entry = channels
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Arc::new(Mutex::new(ChannelState::<E>::default()))) as Box<dyn Any + Send + Sync>);
        entry
            .downcast_ref::<Arc<Mutex<ChannelState<E>>>>()
            .expect("channel type mismatch for TypeId")
            .clone()
    }

    /// Registers `listener` under `key` for events of type `E`. If a
    /// dispatch of `E` is currently in progress (re-entrant subscribe
    /// from inside a listener), the change is queued until that dispatch
    /// completes.
    pub fn subscribe<E: 'static>(&self, key: SubscriberKey, listener: impl FnMut(&E) + Send + 'static) {
        let channel = self.channel::<E>();
        let mut state = channel.lock().unwrap();
        if state.depth > 0 {
            state.pending.push(PendingOp::Subscribe(key, Box::new(listener)));
        } else {
            state.subscribers.push((key, Box::new(listener)));
        }
    }

    /// Removes every subscription registered under `key` for `E`. Queued
    /// the same way as `subscribe` if called during dispatch of `E`.
    pub fn unsubscribe<E: 'static>(&self, key: SubscriberKey) {
        let channel = self.channel::<E>();
        let mut state = channel.lock().unwrap();
        if state.depth > 0 {
            state.pending.push(PendingOp::Unsubscribe(key));
        } else {
            state.subscribers.retain(|(k, _)| *k != key);
        }
    }

    /// Synchronously invokes every subscriber of `E`, in subscription
    /// order, on the calling thread.
    pub fn emit<E: 'static>(&self, event: &E) {
        let channel = self.channel::<E>();

        let mut to_run = {
            let mut state = channel.lock().unwrap();
            state.depth += 1;
            core::mem::take(&mut state.subscribers)
        };

        for (_, listener) in &mut to_run {
            listener(event);
        }

        let mut state = channel.lock().unwrap();
        state.subscribers = to_run;
        state.depth -= 1;
        if state.depth == 0 && !state.pending.is_empty() {
            for op in core::mem::take(&mut state.pending) {
                match op {
                    PendingOp::Subscribe(key, listener) => state.subscribers.push((key, listener)),
                    PendingOp::Unsubscribe(key) => state.subscribers.retain(|(k, _)| *k != key),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct Ping;

    #[test]
    fn fan_out_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe::<Ping>(1, move |_| o1.lock().unwrap().push(1));
        let o2 = order.clone();
        bus.subscribe::<Ping>(2, move |_| o2.lock().unwrap().push(2));

        bus.emit(&Ping);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);

        bus.unsubscribe::<Ping>(1);
        bus.emit(&Ping);
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 2]);
    }

    #[test]
    fn resubscribing_during_dispatch_is_queued() {
        let bus = Arc::new(EventBus::new());
        let calls = Arc::new(AtomicU32::new(0));

        let bus2 = bus.clone();
        let calls2 = calls.clone();
        bus.subscribe::<Ping>(1, move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
            // Subscribing here must not run within this same emit.
            bus2.subscribe::<Ping>(2, |_| {});
        });

        bus.emit(&Ping);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The queued subscription is now active for the next emit.
        bus.emit(&Ping);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
