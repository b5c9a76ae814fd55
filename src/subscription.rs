/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The per-supervisor subscription table: for every address the
//! supervisor owns, the ordered set of handlers subscribed on it.
//!
//! Handlers are kept in insertion order, and delivery fans out over a
//! snapshot of that order. A handler whose actor is controlled by the
//! supervisor owning the table is local and invoked inline; any other
//! handler is foreign and reached through a forwarded handler call.

use std::collections::HashMap;
use std::fmt;

use crate::address::Address;
use crate::handler::Handler;

/// A concrete subscription record: the pair of an address and a handler
/// subscribed on it. Equality is (address identity, handler equality),
/// so a rebuilt descriptor matches the recorded point.
#[derive(Clone, PartialEq, Eq)]
pub struct SubscriptionPoint {
    /// The address subscribed on.
    pub address: Address,
    /// The subscribed handler.
    pub handler: Handler,
}

impl fmt::Debug for SubscriptionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} on {}", self.handler, self.address)
    }
}

/// Address to ordered-handlers map. Owned by one supervisor and touched
/// only on its locality thread.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    entries: HashMap<Address, Vec<Handler>>,
}

impl SubscriptionTable {
    /// Record a subscription point. Returns `false` (and records
    /// nothing) when the point is already present.
    pub(crate) fn subscribe(&mut self, address: &Address, handler: Handler) -> bool {
        let handlers = self.entries.entry(address.clone()).or_default();
        if handlers.contains(&handler) {
            return false;
        }
        handlers.push(handler);
        true
    }

    /// Authoritatively remove a subscription point. Idempotent against
    /// points already gone.
    pub(crate) fn commit_unsubscription(&mut self, address: &Address, handler: &Handler) -> bool {
        let Some(handlers) = self.entries.get_mut(address) else {
            return false;
        };
        let Some(index) = handlers.iter().position(|h| h == handler) else {
            return false;
        };
        handlers.remove(index);
        if handlers.is_empty() {
            self.entries.remove(address);
        }
        true
    }

    /// Snapshot the fan-out set for an address, in registration order.
    pub(crate) fn handlers(&self, address: &Address) -> Vec<Handler> {
        self.entries.get(address).cloned().unwrap_or_default()
    }

    /// Drop every handler owned by the given actor cell, across all
    /// addresses. Used when an actor reaches its terminal state with
    /// framework subscriptions still in place.
    pub(crate) fn remove_actor(&mut self, cell: &crate::actor::ActorCell) {
        self.entries.retain(|_, handlers| {
            handlers.retain(|h| !h.actor().same_cell(cell));
            !handlers.is_empty()
        });
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::test_utils::NullActor;
    use crate::test_utils::TestRig;

    #[derive(Debug)]
    struct Tick;

    #[test]
    fn test_no_duplicate_points() {
        let rig = TestRig::new();
        let actor = rig.sup.create_actor::<NullActor>(()).unwrap();
        let addr = rig.sup.make_address();

        let handler = Handler::bind::<Tick>(actor.cell().clone(), |_| {});
        let mut table = SubscriptionTable::default();
        assert!(table.subscribe(&addr, handler.clone()));
        // An equal (not identical) descriptor is still the same point.
        assert!(!table.subscribe(&addr, Handler::bind::<Tick>(actor.cell().clone(), |_| {})));
        assert_eq!(table.handlers(&addr).len(), 1);
    }

    #[test]
    fn test_insertion_order_preserved() {
        use std::sync::Arc;
        use std::sync::Mutex;

        let rig = TestRig::new();
        let a = rig.sup.create_actor::<NullActor>(()).unwrap();
        let b = rig.sup.create_actor::<NullActor>(()).unwrap();
        let addr = rig.sup.make_address();

        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        let mut table = SubscriptionTable::default();
        table.subscribe(
            &addr,
            Handler::bind::<Tick>(a.cell().clone(), move |_| o1.lock().unwrap().push("a")),
        );
        table.subscribe(
            &addr,
            Handler::bind::<Tick>(b.cell().clone(), move |_| o2.lock().unwrap().push("b")),
        );

        let msg = Message::new(addr.clone(), Tick);
        for handler in table.handlers(&addr) {
            handler.call(&msg);
        }
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_commit_is_idempotent() {
        let rig = TestRig::new();
        let actor = rig.sup.create_actor::<NullActor>(()).unwrap();
        let addr = rig.sup.make_address();
        let handler = Handler::bind::<Tick>(actor.cell().clone(), |_| {});

        let mut table = SubscriptionTable::default();
        table.subscribe(&addr, handler.clone());
        assert!(table.commit_unsubscription(&addr, &handler));
        assert!(!table.commit_unsubscription(&addr, &handler));
        assert!(table.is_empty());
    }
}
