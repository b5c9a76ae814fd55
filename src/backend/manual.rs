/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! A caller-driven event loop. Nothing runs until the caller pumps
//! [`Supervisor::do_process`] itself, and timers fire only when asked
//! to. This makes every core scenario, including timeout races,
//! deterministic in tests: the caller decides whether the response or
//! the timer wins.
//!
//! [`Supervisor::do_process`]: crate::supervisor::Supervisor::do_process

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use crate::address::Address;
use crate::backend::EventLoop;
use crate::backend::TimerId;
use crate::backend::fire_timer;

struct ArmedTimer {
    destination: Address,
    id: TimerId,
}

/// The manual adapter. Holds armed timers; the caller fires them.
#[derive(Default)]
pub struct ManualLoop {
    timers: Mutex<Vec<ArmedTimer>>,
}

impl ManualLoop {
    /// A fresh manual adapter with no armed timers.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of currently armed timers.
    pub fn pending_timers(&self) -> usize {
        self.timers.lock().unwrap().len()
    }

    /// Fire every armed timer, in arming order. The resulting trigger
    /// messages are enqueued; pump the supervisor to observe them.
    pub fn fire_all(&self) {
        let armed: Vec<ArmedTimer> = std::mem::take(&mut *self.timers.lock().unwrap());
        for timer in armed {
            fire_timer(&timer.destination, timer.id);
        }
    }
}

impl EventLoop for ManualLoop {
    fn start_timer(&self, destination: &Address, id: TimerId, _duration: Duration) {
        let mut timers = self.timers.lock().unwrap();
        timers.retain(|t| !(t.id == id && t.destination == *destination));
        timers.push(ArmedTimer {
            destination: destination.clone(),
            id,
        });
    }

    fn cancel_timer(&self, destination: &Address, id: TimerId) {
        self.timers
            .lock()
            .unwrap()
            .retain(|t| !(t.id == id && t.destination == *destination));
    }

    fn wake(&self) {
        // The caller is the loop.
    }
}
