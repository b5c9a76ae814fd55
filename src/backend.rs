/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The event-loop adapter contract.
//!
//! The dispatch core is event-loop agnostic: it consumes a small
//! [`EventLoop`] surface (single-shot timers, a thread-safe wake) and
//! the adapter decides how the locality's thread waits and when
//! [`Supervisor::do_process`] runs. A fired timer re-enters the core as
//! an ordinary message, produced with [`fire_timer`].
//!
//! Two adapters ship with the crate: [`TokioLoop`], a dedicated thread
//! driving a tokio `current_thread` runtime, and [`ManualLoop`], a
//! caller-driven pump for deterministic tests.
//!
//! [`Supervisor::do_process`]: crate::supervisor::Supervisor::do_process

use std::time::Duration;

use crate::address::Address;
use crate::message::Message;
use crate::message::TimerElapsed;
use crate::supervisor::Supervisor;

mod manual;
pub use manual::ManualLoop;
mod tokio;
pub use self::tokio::TokioLoop;

/// Identifies a single-shot timer within its owning supervisor. Timer
/// ids double as request ids; id 0 is reserved for the supervisor's
/// shutdown timer.
pub type TimerId = u32;

pub(crate) const SHUTDOWN_TIMER_ID: TimerId = 0;

/// What the core requires from an event loop. One event loop serves one
/// locality; all supervisors of the locality share it.
///
/// Adapter failures that leave the loop unable to make progress should
/// be reported through [`System::report_fatal`].
///
/// [`System::report_fatal`]: crate::system::System::report_fatal
pub trait EventLoop: Send + Sync + 'static {
    /// Schedule a single-shot timer. On expiry the adapter calls
    /// [`fire_timer`] with the same destination and id. Ids are scoped
    /// per destination supervisor; arming an armed id replaces it.
    fn start_timer(&self, destination: &Address, id: TimerId, duration: Duration);

    /// Best-effort cancel. A timer may fire concurrently with its
    /// cancellation; the core tolerates stale fires.
    fn cancel_timer(&self, destination: &Address, id: TimerId);

    /// Thread-safe: wake the loop so it re-enters the dispatch pump.
    fn wake(&self);

    /// The supervisor leading the adapter's locality was created.
    fn attach(&self, _supervisor: &Supervisor) {}
}

/// Deliver a timer expiry into the core: enqueue the timer-trigger
/// message on the owning supervisor. A destination whose supervisor is
/// gone is ignored.
pub fn fire_timer(destination: &Address, id: TimerId) {
    if let Some(owner) = destination.supervisor() {
        owner.enqueue(Message::new(destination.clone(), TimerElapsed { id }));
    }
}
