/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Addresses are opaque identity tokens naming a dispatch destination.
//!
//! An address is allocated by a [`Supervisor`] and carries a non-owning
//! back-reference to it, along with the supervisor's [`Locality`] tag.
//! Two addresses are equal iff they are the same allocation; there is no
//! structural identity. Addresses are cheap to clone and may be shared
//! freely; a message shared-owns the address it is destined to, so an
//! address outlives every message targeting it.

use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::supervisor::Supervisor;
use crate::supervisor::SupervisorShared;

/// Mints locality tags and address sequence numbers.
static NEXT_LOCALITY: AtomicU64 = AtomicU64::new(0);
static NEXT_ADDRESS: AtomicU64 = AtomicU64::new(0);

/// A locality is the equivalence class of supervisors sharing one
/// event-loop thread and one inbox. Supervisors compare localities to
/// decide between direct delivery and thread-safe forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Locality(u64);

impl Locality {
    pub(crate) fn mint() -> Self {
        Self(NEXT_LOCALITY.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loc{}", self.0)
    }
}

struct AddressInner {
    supervisor: Weak<SupervisorShared>,
    locality: Locality,
    // Diagnostic only; identity is the allocation itself.
    seq: u64,
}

/// An opaque destination token. Equality and hashing are allocation
/// identity. The owning supervisor is reachable (while it is alive)
/// through [`Address::supervisor`]; an address never migrates between
/// supervisors.
#[derive(Clone)]
pub struct Address {
    inner: Arc<AddressInner>,
}

impl Address {
    pub(crate) fn new(supervisor: Weak<SupervisorShared>, locality: Locality) -> Self {
        Self {
            inner: Arc::new(AddressInner {
                supervisor,
                locality,
                seq: NEXT_ADDRESS.fetch_add(1, Ordering::Relaxed),
            }),
        }
    }

    /// The locality tag of the owning supervisor at allocation time.
    pub fn locality(&self) -> Locality {
        self.inner.locality
    }

    /// The supervisor owning this address, or `None` if it has been
    /// dropped. Messages to an ownerless address are dropped silently.
    pub fn supervisor(&self) -> Option<Supervisor> {
        self.inner
            .supervisor
            .upgrade()
            .map(Supervisor::from_shared)
    }

    /// Tells whether this address is owned by the given supervisor.
    pub(crate) fn owned_by(&self, shared: &Arc<SupervisorShared>) -> bool {
        std::ptr::eq(self.inner.supervisor.as_ptr(), Arc::as_ptr(shared))
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.inner) as usize).hash(state);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "addr{}@{}", self.inner.seq, self.inner.locality)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
