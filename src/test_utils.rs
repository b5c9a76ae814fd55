/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Shared fixtures for the crate's tests: a deterministic rig around a
//! manually pumped supervisor, a do-nothing actor, and a ping-pong
//! pair.

use std::sync::Arc;

use crate::actor::Actor;
use crate::actor::Context;
use crate::actor::Handle;
use crate::address::Address;
use crate::backend::ManualLoop;
use crate::supervisor::Supervisor;
use crate::supervisor::SupervisorOptions;
use crate::system::System;

/// A system with one root supervisor on a [`ManualLoop`]. Tests pump
/// `rig.sup.do_process()` themselves and fire timers by hand.
pub(crate) struct TestRig {
    pub(crate) system: System,
    pub(crate) backend: Arc<ManualLoop>,
    pub(crate) sup: Supervisor,
}

impl TestRig {
    pub(crate) fn new() -> Self {
        Self::with_options(SupervisorOptions::default())
    }

    pub(crate) fn with_options(options: SupervisorOptions) -> Self {
        let system = System::new();
        let backend = ManualLoop::new();
        let sup = system.create_supervisor(backend.clone(), options);
        Self {
            system,
            backend,
            sup,
        }
    }
}

/// An actor with no entry points and default lifecycle hooks.
#[derive(Debug)]
pub(crate) struct NullActor;

impl Actor for NullActor {
    type Params = ();

    fn new(_params: ()) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

#[derive(Debug)]
pub(crate) struct Ping {
    pub(crate) n: u32,
    pub(crate) reply_to: Address,
}

#[derive(Debug)]
pub(crate) struct Pong {
    pub(crate) n: u32,
}

/// Sends one ping on start and counts the pongs that come back.
#[derive(Debug)]
pub(crate) struct Pinger {
    ponger: Address,
    pub(crate) pongs: Vec<u32>,
}

impl Actor for Pinger {
    type Params = Address;

    fn new(ponger: Self::Params) -> anyhow::Result<Self> {
        Ok(Self {
            ponger,
            pongs: Vec::new(),
        })
    }

    fn on_initialize(&mut self, ctx: &mut Context<'_, Self>) -> bool {
        ctx.subscribe::<Pong>();
        true
    }

    fn on_start(&mut self, ctx: &mut Context<'_, Self>) {
        let reply_to = ctx.address().clone();
        ctx.send(&self.ponger, Ping { n: 3, reply_to });
    }
}

impl Handle<Pong> for Pinger {
    fn handle(&mut self, _ctx: &mut Context<'_, Self>, message: &Pong) {
        self.pongs.push(message.n);
    }
}

/// Answers every ping with a pong carrying the same sequence number.
#[derive(Debug)]
pub(crate) struct Ponger {
    pub(crate) pings: u32,
}

impl Actor for Ponger {
    type Params = ();

    fn new(_params: ()) -> anyhow::Result<Self> {
        Ok(Self { pings: 0 })
    }

    fn on_initialize(&mut self, ctx: &mut Context<'_, Self>) -> bool {
        ctx.subscribe::<Ping>();
        true
    }
}

impl Handle<Ping> for Ponger {
    fn handle(&mut self, ctx: &mut Context<'_, Self>, message: &Ping) {
        self.pings += 1;
        ctx.send(&message.reply_to, Pong { n: message.n });
    }
}
