/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! A handler binds an actor to a typed entry point. Subscribing a
//! handler on an address routes every matching message delivered to
//! that address into the entry point.
//!
//! Handlers shared-own their actor (through its cell) for as long as
//! they are subscribed. Two handlers are equal iff they refer to the
//! same actor and the same logical entry point; since an actor has at
//! most one entry point per payload type (the [`Handle`] implementation
//! for that type), the entry point is identified by the expected payload
//! [`TypeId`]. This is what makes unsubscription by descriptor work: the
//! caller rebuilds an equal handler rather than producing the identical
//! one.
//!
//! [`Handle`]: crate::actor::Handle

use std::any::TypeId;
use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;

use crate::actor::Actor;
use crate::actor::ActorCell;
use crate::actor::ActorState;
use crate::actor::Context;
use crate::actor::Handle;
use crate::message::Message;
use crate::message::Payload;

struct HandlerInner {
    actor: ActorCell,
    payload_type: TypeId,
    payload_name: &'static str,
    invoke: Box<dyn Fn(&Message) + Send + Sync>,
}

/// A subscription entry binding (actor, entry point, expected payload
/// type). Cheap to clone; usable as a set or map key.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<HandlerInner>,
}

impl Handler {
    /// Bind an erased entry point. The closure is only invoked with
    /// messages whose payload tag matches `P`.
    pub(crate) fn bind<P: Payload>(
        actor: ActorCell,
        invoke: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(HandlerInner {
                actor,
                payload_type: TypeId::of::<P>(),
                payload_name: std::any::type_name::<P>(),
                invoke: Box::new(invoke),
            }),
        }
    }

    /// Bind the `Handle<P>` entry point of a typed actor. The resulting
    /// closure locks the actor's behavior for the duration of the call;
    /// handlers run to completion.
    pub(crate) fn entry<A, P>(cell: &ActorCell) -> Self
    where
        A: Actor + Handle<P>,
        P: Payload,
    {
        let behavior = cell.behavior::<A>();
        let target = cell.clone();
        Self::bind::<P>(cell.clone(), move |message| {
            let Some(payload) = message.downcast_ref::<P>() else {
                return;
            };
            let Some(mut ctx) = Context::<A>::try_new(&target) else {
                return;
            };
            let mut actor = behavior.lock().unwrap();
            Handle::<P>::handle(&mut *actor, &mut ctx, payload);
        })
    }

    /// The cell of the owning actor.
    pub(crate) fn actor(&self) -> &ActorCell {
        &self.inner.actor
    }

    /// The payload tag this handler expects.
    pub(crate) fn payload_type(&self) -> TypeId {
        self.inner.payload_type
    }

    /// Invoke the entry point if the message payload matches. Handlers
    /// of actors that reached their terminal state never fire; a message
    /// can be in flight (e.g. inside a forwarded handler call) when its
    /// target winds down.
    pub(crate) fn call(&self, message: &Message) {
        if message.payload_type() != self.inner.payload_type {
            return;
        }
        if self.inner.actor.state() == ActorState::ShutDown {
            return;
        }
        (self.inner.invoke)(message);
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        self.inner.actor.same_cell(&other.inner.actor)
            && self.inner.payload_type == other.inner.payload_type
    }
}

impl Eq for Handler {}

impl Hash for Handler {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.actor.cell_id().hash(state);
        self.inner.payload_type.hash(state);
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Handler({} at {})",
            self.inner.payload_name,
            self.inner.actor.address()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::test_utils::NullActor;
    use crate::test_utils::TestRig;

    #[derive(Debug)]
    struct Alpha;
    #[derive(Debug)]
    struct Beta;

    #[test]
    fn test_equality_and_hash() {
        let rig = TestRig::new();
        let a = rig.sup.create_actor::<NullActor>(()).unwrap();
        let b = rig.sup.create_actor::<NullActor>(()).unwrap();

        let a_alpha = Handler::bind::<Alpha>(a.cell().clone(), |_| {});
        let a_alpha2 = Handler::bind::<Alpha>(a.cell().clone(), |_| {});
        let a_beta = Handler::bind::<Beta>(a.cell().clone(), |_| {});
        let b_alpha = Handler::bind::<Alpha>(b.cell().clone(), |_| {});

        // Same actor, same entry point: equal even though the closures
        // are distinct allocations.
        assert_eq!(a_alpha, a_alpha2);
        assert_ne!(a_alpha, a_beta);
        assert_ne!(a_alpha, b_alpha);

        let mut set = HashSet::new();
        set.insert(a_alpha.clone());
        set.insert(a_alpha2);
        set.insert(a_beta);
        set.insert(b_alpha);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_call_is_type_guarded() {
        use std::sync::Arc;
        use std::sync::atomic::AtomicUsize;
        use std::sync::atomic::Ordering;

        let rig = TestRig::new();
        let a = rig.sup.create_actor::<NullActor>(()).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let handler = Handler::bind::<Alpha>(a.cell().clone(), move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        let addr = rig.sup.make_address();
        handler.call(&Message::new(addr.clone(), Alpha));
        handler.call(&Message::new(addr, Beta));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
