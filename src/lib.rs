/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Stator is a message-dispatch and supervision core: isolated actors
//! communicate only by asynchronous messages sent to logical addresses,
//! and hierarchical supervisors own actor lifecycles, dispatch their
//! messages, and coordinate initialization, correlated request/response
//! with timeouts, and orderly shutdown.
//!
//! # Model
//!
//! * An [`Address`] is an opaque identity token naming a destination.
//!   It is allocated by the [`Supervisor`] that owns it and tagged with
//!   the supervisor's [`Locality`].
//! * A [`Message`] carries a destination address and a typed payload;
//!   payloads are discriminated by their stable type tag.
//! * A [`Handler`] binds an actor to a typed entry point (a [`Handle`]
//!   implementation); subscribing it on an address routes matching
//!   messages into the actor.
//! * Supervisors sharing a [`Locality`] share one inbox and one loop
//!   thread; handlers always run on their actor's locality thread and
//!   run to completion. The only thread-safe entry into a locality is
//!   [`Supervisor::enqueue`].
//!
//! Scheduling is single-threaded cooperative per locality: the event
//! loop (see [`backend`]) pumps [`Supervisor::do_process`], which
//! drains the locality inbox, delivering each message locally or
//! forwarding it to the owning supervisor.
//!
//! # Example
//!
//! ```
//! use stator::backend::ManualLoop;
//! use stator::Actor;
//! use stator::Context;
//! use stator::Handle;
//! use stator::SupervisorOptions;
//! use stator::System;
//!
//! #[derive(Debug)]
//! struct Greeting(&'static str);
//!
//! #[derive(Debug)]
//! struct Greeter {
//!     seen: usize,
//! }
//!
//! impl Actor for Greeter {
//!     type Params = ();
//!
//!     fn new(_params: ()) -> anyhow::Result<Self> {
//!         Ok(Self { seen: 0 })
//!     }
//!
//!     fn on_initialize(&mut self, ctx: &mut Context<'_, Self>) -> bool {
//!         ctx.subscribe::<Greeting>();
//!         true
//!     }
//! }
//!
//! impl Handle<Greeting> for Greeter {
//!     fn handle(&mut self, _ctx: &mut Context<'_, Self>, _message: &Greeting) {
//!         self.seen += 1;
//!     }
//! }
//!
//! let system = System::new();
//! let event_loop = ManualLoop::new();
//! let sup = system.create_supervisor(event_loop, SupervisorOptions::default());
//! let greeter = sup.create_actor::<Greeter>(()).unwrap();
//!
//! sup.start();
//! sup.do_process(); // greeter is now operational
//!
//! sup.send(greeter.address(), Greeting("hello"));
//! sup.do_process();
//! assert_eq!(greeter.inspect(|g| g.seen), 1);
//! ```

#![deny(missing_docs)]

pub mod address;
pub mod backend;
pub mod message;
pub mod request;
pub mod supervisor;
pub mod system;

mod actor;
mod handler;
mod plugin;
mod subscription;
#[cfg(test)]
mod test_utils;

pub use actor::Actor;
pub use actor::ActorCell;
pub use actor::ActorHandle;
pub use actor::ActorState;
pub use actor::Context;
pub use actor::Handle;
pub use address::Address;
pub use address::Locality;
pub use backend::EventLoop;
pub use backend::TimerId;
pub use handler::Handler;
pub use message::Message;
pub use message::Payload;
pub use message::StateRequest;
pub use message::StateResponse;
pub use request::Request;
pub use request::RequestBuilder;
pub use request::RequestError;
pub use request::RequestId;
pub use request::Requestable;
pub use request::Response;
pub use subscription::SubscriptionPoint;
pub use supervisor::Supervisor;
pub use supervisor::SupervisorOptions;
pub use system::FatalError;
pub use system::System;
