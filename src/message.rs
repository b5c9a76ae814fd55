/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Messages are immutable envelopes carrying a destination [`Address`]
//! and a typed payload.
//!
//! Payload types are discriminated at runtime by their [`TypeId`], the
//! process-wide stable type tag; this is the only form of runtime type
//! discrimination in the dispatch core. A message is shared (not copied)
//! while it fans out to handlers, and the same payload allocation is
//! reused when a message is re-addressed, as happens when a correlated
//! response is forwarded from its private routing point to the caller.

use std::any::Any;
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use crate::actor::ActorCell;
use crate::actor::ActorState;
use crate::address::Address;
use crate::backend::TimerId;
use crate::handler::Handler;
use crate::subscription::SubscriptionPoint;

/// Payload collects the necessary requirements for message payloads:
/// a stable type tag (via [`Any`]), thread mobility (messages cross
/// locality boundaries when forwarded), and debuggability.
pub trait Payload: Any + Send + Sync + fmt::Debug + 'static {}
impl<P: Any + Send + Sync + fmt::Debug + 'static> Payload for P {}

struct MessageInner {
    destination: Address,
    payload: Arc<dyn Any + Send + Sync>,
    payload_type: TypeId,
    payload_name: &'static str,
}

/// An immutable message envelope. Cloning shares the underlying
/// allocation; the payload is written once by the sender and read by
/// zero or more handlers.
#[derive(Clone)]
pub struct Message {
    inner: Arc<MessageInner>,
}

impl Message {
    /// Create a new message destined to `destination`.
    pub fn new<P: Payload>(destination: Address, payload: P) -> Self {
        Self {
            inner: Arc::new(MessageInner {
                destination,
                payload: Arc::new(payload),
                payload_type: TypeId::of::<P>(),
                payload_name: std::any::type_name::<P>(),
            }),
        }
    }

    /// The destination address.
    pub fn destination(&self) -> &Address {
        &self.inner.destination
    }

    /// The stable type tag of the payload.
    pub fn payload_type(&self) -> TypeId {
        self.inner.payload_type
    }

    /// Tells whether the payload is a `P`.
    pub fn is<P: Payload>(&self) -> bool {
        self.inner.payload_type == TypeId::of::<P>()
    }

    /// Borrow the payload as a `P`, if that is what it is.
    pub fn downcast_ref<P: Payload>(&self) -> Option<&P> {
        self.inner.payload.downcast_ref::<P>()
    }

    /// Re-address this message, reusing the payload allocation.
    pub(crate) fn redirect(&self, destination: Address) -> Self {
        Self {
            inner: Arc::new(MessageInner {
                destination,
                payload: Arc::clone(&self.inner.payload),
                payload_type: self.inner.payload_type,
                payload_name: self.inner.payload_name,
            }),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message({} -> {})",
            self.inner.payload_name, self.inner.destination
        )
    }
}

// Control-plane payloads. These drive actor lifecycle, the subscription
// protocol, cross-supervisor handler invocation, and timers. They are
// dispatched through the same tables as user payloads.

/// Records a freshly constructed actor with its owning supervisor.
#[derive(Debug)]
pub(crate) struct CreateActor {
    pub(crate) cell: ActorCell,
    pub(crate) child: ChildBody,
}

/// What the supervisor retains for a child: plain actors are owned
/// through their cell; child supervisors are self-managed and tracked
/// through their handle.
#[derive(Debug)]
pub(crate) enum ChildBody {
    Actor,
    Supervisor(crate::supervisor::Supervisor),
}

/// Asks an actor to initialize. The reply is an [`InitConfirmation`]
/// sent to `reply_to` once every init-slot plugin reports done.
#[derive(Debug)]
pub(crate) struct InitRequest {
    pub(crate) reply_to: Address,
}

/// Init completed for the actor at `address`.
#[derive(Debug)]
pub(crate) struct InitConfirmation {
    pub(crate) address: Address,
}

/// Moves an initialized actor into its operational state.
#[derive(Debug)]
pub(crate) struct StartActor;

/// Asks an actor to shut down. The reply is a [`ShutdownConfirmation`]
/// sent to `reply_to` once every shutdown-slot plugin reports done.
#[derive(Debug)]
pub(crate) struct ShutdownRequest {
    pub(crate) reply_to: Address,
}

/// Shutdown completed for the actor at `address`.
#[derive(Debug)]
pub(crate) struct ShutdownConfirmation {
    pub(crate) address: Address,
}

/// A subscription point was recorded by the owning supervisor; sent to
/// the subscribing actor so it can track the point for teardown.
#[derive(Debug)]
pub(crate) struct SubscriptionConfirmation {
    pub(crate) point: SubscriptionPoint,
}

/// Subscribe request for an address owned by another supervisor.
#[derive(Debug)]
pub(crate) struct ExternalSubscription {
    pub(crate) point: SubscriptionPoint,
}

/// A local unsubscription is ready to be committed; sent to the
/// subscribing actor, which commits against the owning supervisor.
#[derive(Debug)]
pub(crate) struct UnsubscriptionConfirmation {
    pub(crate) point: SubscriptionPoint,
}

/// As [`UnsubscriptionConfirmation`], for a point whose address is owned
/// by a foreign supervisor: the subscriber answers with a
/// [`CommitUnsubscription`] to the owner.
#[derive(Debug)]
pub(crate) struct ExternalUnsubscription {
    pub(crate) point: SubscriptionPoint,
}

/// Authoritative removal of a subscription point. Idempotent: the point
/// (or its whole owner) may already be gone.
#[derive(Debug)]
pub(crate) struct CommitUnsubscription {
    pub(crate) point: SubscriptionPoint,
}

/// Wraps a message for a handler whose actor is controlled by another
/// supervisor: the owner of the destination address forwards the call to
/// the supervisor owning the handler, which invokes it on its own
/// locality thread.
#[derive(Debug)]
pub(crate) struct HandlerCall {
    pub(crate) message: Message,
    pub(crate) handler: Handler,
}

/// A single-shot timer fired.
#[derive(Debug)]
pub(crate) struct TimerElapsed {
    pub(crate) id: TimerId,
}

/// Asks a supervisor for the lifecycle state of the actor addressed by
/// `subject`. Answered with a [`StateResponse`] to `reply_to`.
#[derive(Debug)]
pub struct StateRequest {
    /// Primary address of the actor of interest.
    pub subject: Address,
    /// Where to deliver the [`StateResponse`].
    pub reply_to: Address,
}

/// Answer to a [`StateRequest`]. `state` is `None` when the subject is
/// unknown to the answering supervisor (not yet created, already
/// removed, or simply not one of its children).
#[derive(Debug)]
pub struct StateResponse {
    /// The subject the request asked about.
    pub subject: Address,
    /// The subject's lifecycle state, if known.
    pub state: Option<ActorState>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ManualLoop;
    use crate::supervisor::SupervisorOptions;
    use crate::system::System;

    #[derive(Debug, PartialEq)]
    struct Blip(u32);

    #[test]
    fn test_payload_downcast() {
        let system = System::new();
        let sup = system.create_supervisor(ManualLoop::new(), SupervisorOptions::default());
        let msg = Message::new(sup.make_address(), Blip(7));

        assert!(msg.is::<Blip>());
        assert!(!msg.is::<u32>());
        assert_eq!(msg.downcast_ref::<Blip>(), Some(&Blip(7)));
        assert!(msg.downcast_ref::<u32>().is_none());
    }

    #[test]
    fn test_redirect_shares_payload() {
        let system = System::new();
        let sup = system.create_supervisor(ManualLoop::new(), SupervisorOptions::default());
        let msg = Message::new(sup.make_address(), Blip(1));

        let other = sup.make_address();
        let moved = msg.redirect(other.clone());
        assert_eq!(moved.destination(), &other);
        assert_eq!(moved.payload_type(), msg.payload_type());
        assert!(std::ptr::eq(
            msg.downcast_ref::<Blip>().unwrap(),
            moved.downcast_ref::<Blip>().unwrap()
        ));
    }
}
