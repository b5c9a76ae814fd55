/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Correlated request/response with timeout cancellation.
//!
//! Responses are not delivered on the destination's primary address.
//! For each distinct response payload type, the requesting supervisor
//! lazily allocates one private response address, installs a single
//! handler there, and caches it for its lifetime. The private address
//! keeps response dispatch a one-handler lookup, and keeps
//! timeout-guarded responses from being confused with unsolicited
//! messages of the same type arriving at the primary address.
//!
//! Per request, exactly one of the real response and the synthetic
//! timeout reaches the caller. Both race for the same `request_map`
//! entry, and whichever removes it wins; the loser is dropped silently.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::address::Address;
use crate::backend::TimerId;
use crate::message::Message;
use crate::message::Payload;
use crate::supervisor::Supervisor;

/// Identifies a request; doubles as the id of its timeout timer.
pub type RequestId = TimerId;

/// The only first-class error produced by the dispatch core.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    /// No response arrived within the requested window.
    #[error("request timed out")]
    Timeout,
}

/// A payload that can travel as a request. The associated type names
/// the payload the responder answers with.
pub trait Requestable: Payload {
    /// The response payload type.
    type Response: Payload;
}

struct RequestInner<R: Requestable> {
    id: RequestId,
    reply_to: Address,
    payload: R,
}

/// A request envelope: the caller's payload, the request id, and the
/// private address responses must be sent back to. Cheap to clone; the
/// synthetic timeout response carries the original request, so the
/// envelope is shared between the request in flight and the stored
/// timeout.
pub struct Request<R: Requestable> {
    inner: Arc<RequestInner<R>>,
}

impl<R: Requestable> Request<R> {
    pub(crate) fn new(id: RequestId, reply_to: Address, payload: R) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                id,
                reply_to,
                payload,
            }),
        }
    }

    /// The request's correlation id.
    pub fn id(&self) -> RequestId {
        self.inner.id
    }

    /// Where the response payload must be sent.
    pub fn reply_to(&self) -> &Address {
        &self.inner.reply_to
    }

    /// The caller's payload.
    pub fn payload(&self) -> &R {
        &self.inner.payload
    }
}

impl<R: Requestable> Clone for Request<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Requestable> fmt::Debug for Request<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Request#{}({:?})", self.inner.id, self.inner.payload)
    }
}

/// The answer to a [`Request`]: either the responder's payload or
/// [`RequestError::Timeout`], with the original request attached.
pub struct Response<R: Requestable> {
    request: Request<R>,
    result: Result<R::Response, RequestError>,
}

impl<R: Requestable> Response<R> {
    pub(crate) fn new(request: Request<R>, result: Result<R::Response, RequestError>) -> Self {
        Self { request, result }
    }

    /// The correlation id this response answers.
    pub fn id(&self) -> RequestId {
        self.request.id()
    }

    /// The original request.
    pub fn request(&self) -> &Request<R> {
        &self.request
    }

    /// The outcome.
    pub fn result(&self) -> Result<&R::Response, RequestError> {
        self.result.as_ref().map_err(|e| *e)
    }
}

impl<R: Requestable> fmt::Debug for Response<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Response#{}({:?})", self.request.id(), self.result)
    }
}

/// Builder returned by `request`; the request is dispatched when the
/// timeout is applied.
#[must_use = "a request is only sent once a timeout is applied"]
pub struct RequestBuilder<R: Requestable> {
    supervisor: Supervisor,
    destination: Address,
    caller: Address,
    request: Request<R>,
}

impl<R: Requestable> RequestBuilder<R> {
    pub(crate) fn new(
        supervisor: Supervisor,
        destination: Address,
        caller: Address,
        request: Request<R>,
    ) -> Self {
        Self {
            supervisor,
            destination,
            caller,
            request,
        }
    }

    /// Send the request and arm its timeout. The caller observes the
    /// outcome as a [`Response<R>`] on its primary address.
    pub fn timeout(self, duration: Duration) -> RequestId {
        let id = self.request.id();
        let timeout = Message::new(
            self.caller,
            Response::new(self.request.clone(), Err(RequestError::Timeout)),
        );
        self.supervisor
            .arm_request(id, timeout, duration);
        self.supervisor
            .put(Message::new(self.destination, self.request));
        id
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::actor::Actor;
    use crate::actor::ActorState;
    use crate::actor::Context;
    use crate::actor::Handle;
    use crate::test_utils::TestRig;

    #[derive(Debug)]
    struct Echo(u64);

    impl Requestable for Echo {
        type Response = Echoed;
    }

    #[derive(Debug)]
    struct Echoed(u64);

    /// Replies to every echo request, unless muted.
    #[derive(Debug)]
    struct Responder {
        mute: bool,
        held: Option<Request<Echo>>,
    }

    impl Actor for Responder {
        type Params = bool;

        fn new(mute: bool) -> anyhow::Result<Self> {
            Ok(Self { mute, held: None })
        }

        fn on_initialize(&mut self, ctx: &mut Context<'_, Self>) -> bool {
            ctx.subscribe::<Request<Echo>>();
            ctx.subscribe::<LateReply>();
            true
        }
    }

    impl Handle<Request<Echo>> for Responder {
        fn handle(&mut self, ctx: &mut Context<'_, Self>, message: &Request<Echo>) {
            if self.mute {
                self.held = Some(message.clone());
            } else {
                ctx.reply_to(message, Echoed(message.payload().0 * 2));
            }
        }
    }

    #[derive(Debug)]
    struct LateReply;

    impl Handle<LateReply> for Responder {
        fn handle(&mut self, ctx: &mut Context<'_, Self>, _message: &LateReply) {
            if let Some(request) = self.held.take() {
                ctx.reply_to(&request, Echoed(request.payload().0 * 2));
            }
        }
    }

    /// Issues one echo request on start and records every response.
    #[derive(Debug)]
    struct Caller {
        target: Address,
        responses: Vec<Result<u64, RequestError>>,
    }

    impl Actor for Caller {
        type Params = Address;

        fn new(target: Address) -> anyhow::Result<Self> {
            Ok(Self {
                target,
                responses: Vec::new(),
            })
        }

        fn on_initialize(&mut self, ctx: &mut Context<'_, Self>) -> bool {
            ctx.subscribe::<Response<Echo>>();
            true
        }

        fn on_start(&mut self, ctx: &mut Context<'_, Self>) {
            ctx.request(&self.target, Echo(21))
                .timeout(Duration::from_millis(10));
        }
    }

    impl Handle<Response<Echo>> for Caller {
        fn handle(&mut self, _ctx: &mut Context<'_, Self>, message: &Response<Echo>) {
            self.responses
                .push(message.result().map(|echoed| echoed.0));
        }
    }

    #[test]
    fn test_request_response_roundtrip() {
        let rig = TestRig::new();
        let responder = rig.sup.create_actor::<Responder>(false).unwrap();
        let caller = rig
            .sup
            .create_actor::<Caller>(responder.address().clone())
            .unwrap();

        rig.sup.start();
        rig.sup.do_process();

        assert_eq!(caller.inspect(|c| c.responses.clone()), vec![Ok(42)]);
        // The response consumed the correlation entry and the timer.
        assert_eq!(rig.backend.pending_timers(), 0);

        rig.backend.fire_all();
        rig.sup.do_process();
        assert_eq!(caller.inspect(|c| c.responses.len()), 1);
    }

    #[test]
    fn test_timeout_fires() {
        let rig = TestRig::new();
        let responder = rig.sup.create_actor::<Responder>(true).unwrap();
        let caller = rig
            .sup
            .create_actor::<Caller>(responder.address().clone())
            .unwrap();

        rig.sup.start();
        rig.sup.do_process();
        assert_eq!(caller.inspect(|c| c.responses.len()), 0);

        rig.backend.fire_all();
        rig.sup.do_process();
        assert_eq!(
            caller.inspect(|c| c.responses.clone()),
            vec![Err(RequestError::Timeout)]
        );
    }

    #[test]
    fn test_late_response_dropped() {
        let rig = TestRig::new();
        let responder = rig.sup.create_actor::<Responder>(true).unwrap();
        let caller = rig
            .sup
            .create_actor::<Caller>(responder.address().clone())
            .unwrap();

        rig.sup.start();
        rig.sup.do_process();

        rig.backend.fire_all();
        rig.sup.do_process();

        // The responder answers after the timeout already won.
        rig.sup
            .put(Message::new(responder.address().clone(), LateReply));
        rig.sup.do_process();

        assert_eq!(
            caller.inspect(|c| c.responses.clone()),
            vec![Err(RequestError::Timeout)]
        );
        assert_eq!(rig.sup.state(), ActorState::Operational);
    }
}
