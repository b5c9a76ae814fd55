/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! This module contains the core traits used to define actors, and the
//! per-actor runtime state driving their lifecycle.
//!
//! An actor is a unit of isolated state addressed by one or more
//! addresses; it runs code only in response to messages, and every
//! handler runs to completion on its locality's loop thread. Lifecycle
//! is a message-driven state machine:
//!
//! ```text
//! New -> Initializing -> Operational -> ShuttingDown -> ShutDown
//!             \__________________________^
//! ```
//!
//! with `Initializing -> ShuttingDown` permitted for actors wound down
//! before they finished coming up. Transitions are driven by the plugin
//! chain installed in the actor's [`ActorCell`]; user types participate
//! through the [`Actor`] callbacks and [`Handle`] entry points.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::Weak;

use crate::address::Address;
use crate::handler::Handler;
use crate::message::Message;
use crate::message::Payload;
use crate::message::ShutdownRequest;
use crate::plugin::Plugin;
use crate::plugin::Slot;
use crate::request::Request;
use crate::request::RequestBuilder;
use crate::request::Requestable;
use crate::subscription::SubscriptionPoint;
use crate::supervisor::Supervisor;
use crate::supervisor::SupervisorShared;

/// The lifecycle state of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorState {
    /// Constructed, not yet asked to initialize.
    New,
    /// Initialization in progress; init-slot plugins are running.
    Initializing,
    /// Ready: subscribed handlers receive messages.
    Operational,
    /// Shutdown in progress; subscription points are being torn down.
    ShuttingDown,
    /// Terminal. The actor holds no subscription points and its
    /// handlers never fire again.
    ShutDown,
}

impl fmt::Display for ActorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Initializing => write!(f, "initializing"),
            Self::Operational => write!(f, "operational"),
            Self::ShuttingDown => write!(f, "shutting-down"),
            Self::ShutDown => write!(f, "shut-down"),
        }
    }
}

/// An Actor is an isolated unit of state reacting to messages.
///
/// The callbacks bracket the actor's life: `on_initialize` runs when the
/// owning supervisor asks the actor to come up (subscribe entry points
/// here), `on_start` runs when it becomes operational, and `on_shutdown`
/// runs when it is asked to wind down.
///
/// `on_initialize` and `on_shutdown` return whether the actor is done
/// with that phase. Returning `false` defers completion: the actor is
/// expected to re-enter through [`Context::init_continue`] (resp.
/// [`Context::shutdown_continue`]) from a later handler, typically after
/// some asynchronous work posted its completion message.
pub trait Actor: Sized + Send + fmt::Debug + 'static {
    /// The type of instantiation parameters accepted by this actor.
    type Params: Send + 'static;

    /// Creates the actor state from its instantiation parameters.
    fn new(params: Self::Params) -> anyhow::Result<Self>;

    /// Initialization hook. Subscribe entry points here.
    fn on_initialize(&mut self, _ctx: &mut Context<'_, Self>) -> bool {
        true
    }

    /// The actor became operational.
    fn on_start(&mut self, _ctx: &mut Context<'_, Self>) {}

    /// Shutdown hook. Returning `false` defers completion.
    fn on_shutdown(&mut self, _ctx: &mut Context<'_, Self>) -> bool {
        true
    }
}

/// A Handle implementation gives an actor an entry point for a specific
/// payload type. Subscribing the entry point on an address routes
/// matching messages into [`Handle::handle`].
///
/// Entry points are non-throwing: a panic escaping a handler poisons
/// the actor and takes the locality's loop thread down with it.
pub trait Handle<P: Payload>: Actor {
    /// Handle the next `P`-typed message. Runs to completion on the
    /// actor's locality thread.
    fn handle(&mut self, ctx: &mut Context<'_, Self>, message: &P);
}

pub(crate) struct CellGuts {
    state: ActorState,
    resources: u32,
    init_request: Option<Message>,
    shutdown_request: Option<Message>,
    plugins: Vec<Option<Box<dyn Plugin>>>,
    init_slot: Vec<usize>,
    shutdown_slot: Vec<usize>,
    subscription_slot: Vec<usize>,
    unsubscription_slot: Vec<usize>,
}

impl CellGuts {
    fn slot_order(&self, slot: Slot) -> Vec<usize> {
        match slot {
            Slot::Init => self.init_slot.clone(),
            Slot::Shutdown => self.shutdown_slot.clone(),
            Slot::Subscription => self.subscription_slot.clone(),
            Slot::Unsubscription => self.unsubscription_slot.clone(),
        }
    }
}

struct CellInner {
    address: Address,
    supervisor: Weak<SupervisorShared>,
    behavior: OnceLock<Arc<dyn Any + Send + Sync>>,
    guts: Mutex<CellGuts>,
}

/// The type-erased per-actor runtime record: lifecycle state machine,
/// plugin chain, resource counter, and the pending init/shutdown
/// requests awaiting their reply. Handlers shared-own their actor
/// through its cell.
#[derive(Clone)]
pub struct ActorCell {
    inner: Arc<CellInner>,
}

impl ActorCell {
    pub(crate) fn new(address: Address, supervisor: Weak<SupervisorShared>) -> Self {
        Self {
            inner: Arc::new(CellInner {
                address,
                supervisor,
                behavior: OnceLock::new(),
                guts: Mutex::new(CellGuts {
                    state: ActorState::New,
                    resources: 0,
                    init_request: None,
                    shutdown_request: None,
                    plugins: Vec::new(),
                    init_slot: Vec::new(),
                    shutdown_slot: Vec::new(),
                    subscription_slot: Vec::new(),
                    unsubscription_slot: Vec::new(),
                }),
            }),
        }
    }

    /// The actor's primary address.
    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    /// The owning supervisor, if still alive.
    pub fn supervisor(&self) -> Option<Supervisor> {
        self.inner.supervisor.upgrade().map(Supervisor::from_shared)
    }

    /// The actor's current lifecycle state.
    pub fn state(&self) -> ActorState {
        self.inner.guts.lock().unwrap().state
    }

    pub(crate) fn same_cell(&self, other: &ActorCell) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn cell_id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub(crate) fn owned_by(&self, shared: &Arc<SupervisorShared>) -> bool {
        std::ptr::eq(self.inner.supervisor.as_ptr(), Arc::as_ptr(shared))
    }

    pub(crate) fn attach_behavior(&self, behavior: Arc<dyn Any + Send + Sync>) {
        if self.inner.behavior.set(behavior).is_err() {
            panic!("behavior already attached");
        }
    }

    /// The actor's behavior state. The cell is the single place the
    /// erased behavior is recovered from, so the downcast cannot fail
    /// for a correctly typed caller.
    pub(crate) fn behavior<A: Actor>(&self) -> Arc<Mutex<A>> {
        match self
            .inner
            .behavior
            .get()
            .expect("behavior not attached")
            .clone()
            .downcast::<Mutex<A>>()
        {
            Ok(behavior) => behavior,
            Err(_) => panic!("behavior type mismatch at {}", self.inner.address),
        }
    }

    pub(crate) fn install_plugins(
        &self,
        plugins: Vec<Box<dyn Plugin>>,
        init_slot: Vec<usize>,
        shutdown_slot: Vec<usize>,
        subscription_slot: Vec<usize>,
        unsubscription_slot: Vec<usize>,
    ) {
        let mut guts = self.inner.guts.lock().unwrap();
        guts.plugins = plugins.into_iter().map(Some).collect();
        guts.init_slot = init_slot;
        guts.shutdown_slot = shutdown_slot;
        guts.subscription_slot = subscription_slot;
        guts.unsubscription_slot = unsubscription_slot;
    }

    // Lifecycle driving. The guts lock is never held across a plugin
    // call: plugins are taken out of their slot, invoked, and put back,
    // so they may re-enter cell methods freely.

    fn drive_slot(&self, slot: Slot, behavior: &mut dyn Any) -> bool {
        let order = self.inner.guts.lock().unwrap().slot_order(slot);
        for index in order {
            let Some(mut plugin) = self.take_plugin(index) else {
                continue;
            };
            let done = match slot {
                Slot::Init => plugin.handle_init(self, behavior),
                Slot::Shutdown => plugin.handle_shutdown(self, behavior),
                Slot::Subscription | Slot::Unsubscription => true,
            };
            self.put_back_plugin(index, plugin);
            if !done {
                return false;
            }
        }
        true
    }

    fn take_plugin(&self, index: usize) -> Option<Box<dyn Plugin>> {
        self.inner
            .guts
            .lock()
            .unwrap()
            .plugins
            .get_mut(index)
            .and_then(Option::take)
    }

    fn put_back_plugin(&self, index: usize, plugin: Box<dyn Plugin>) {
        let mut guts = self.inner.guts.lock().unwrap();
        if let Some(slot) = guts.plugins.get_mut(index) {
            *slot = Some(plugin);
        }
    }

    /// An init request arrived. Returns whether initialization actually
    /// began; a request outside `New` is a bug in the requester.
    pub(crate) fn begin_init(&self, request: Message) -> bool {
        let mut guts = self.inner.guts.lock().unwrap();
        if guts.state != ActorState::New {
            debug_assert!(false, "init request for {} in state {}", self.address(), guts.state);
            tracing::debug!("dropping init request for {} in state {}", self.address(), guts.state);
            return false;
        }
        guts.state = ActorState::Initializing;
        guts.init_request = Some(request);
        true
    }

    /// Run the init slot until a plugin defers. Invoked on arrival of
    /// the init request and again on every `init_continue`.
    pub(crate) fn drive_init(&self, behavior: &mut dyn Any) {
        {
            let guts = self.inner.guts.lock().unwrap();
            if guts.state != ActorState::Initializing || guts.init_request.is_none() {
                return;
            }
        }
        self.drive_slot(Slot::Init, behavior);
    }

    /// A shutdown request arrived. Returns whether shutdown actually
    /// began (duplicates are ignored).
    pub(crate) fn begin_shutdown(&self, request: Message) -> bool {
        let mut guts = self.inner.guts.lock().unwrap();
        match guts.state {
            ActorState::Operational | ActorState::Initializing => {
                guts.state = ActorState::ShuttingDown;
                guts.shutdown_request = Some(request);
                true
            }
            state => {
                debug_assert!(
                    state != ActorState::New,
                    "shutdown request for {} before init",
                    self.address()
                );
                tracing::debug!(
                    "dropping shutdown request for {} in state {}",
                    self.address(),
                    state
                );
                false
            }
        }
    }

    /// Run the shutdown slot until a plugin defers. Re-entered whenever
    /// one of the shutdown gates opens: subscription points drained,
    /// resources released, a child removed, or the user resumed.
    pub(crate) fn drive_shutdown(&self, behavior: &mut dyn Any) {
        if self.state() != ActorState::ShuttingDown {
            return;
        }
        self.drive_slot(Slot::Shutdown, behavior);
    }

    /// Note an explicit user continuation before re-driving a slot, so
    /// the behavior plugin can distinguish it from internal re-drives.
    pub(crate) fn user_resume(&self, slot: Slot) {
        let mut guts = self.inner.guts.lock().unwrap();
        for plugin in guts.plugins.iter_mut().flatten() {
            plugin.note_user_resume(slot);
        }
    }

    /// Mark the actor operational. False when the start message raced a
    /// shutdown and lost.
    pub(crate) fn finish_start(&self) -> bool {
        let mut guts = self.inner.guts.lock().unwrap();
        if guts.state != ActorState::Initializing {
            return false;
        }
        guts.state = ActorState::Operational;
        true
    }

    pub(crate) fn set_state(&self, state: ActorState) {
        self.inner.guts.lock().unwrap().state = state;
    }

    /// Reply to the pending init request, if any.
    pub(crate) fn reply_init(&self) {
        let request = self.inner.guts.lock().unwrap().init_request.take();
        let (Some(request), Some(sup)) = (request, self.supervisor()) else {
            return;
        };
        let Some(init) = request.downcast_ref::<crate::message::InitRequest>() else {
            return;
        };
        sup.put(Message::new(
            init.reply_to.clone(),
            crate::message::InitConfirmation {
                address: self.address().clone(),
            },
        ));
    }

    /// Reply to the pending shutdown request, if any.
    pub(crate) fn reply_shutdown(&self) {
        let request = self.inner.guts.lock().unwrap().shutdown_request.take();
        let (Some(request), Some(sup)) = (request, self.supervisor()) else {
            return;
        };
        let Some(shutdown) = request.downcast_ref::<ShutdownRequest>() else {
            return;
        };
        sup.put(Message::new(
            shutdown.reply_to.clone(),
            crate::message::ShutdownConfirmation {
                address: self.address().clone(),
            },
        ));
    }

    /// A subscription point of this actor was recorded by the owner.
    pub(crate) fn on_subscription(&self, point: SubscriptionPoint) {
        let order = self
            .inner
            .guts
            .lock()
            .unwrap()
            .slot_order(Slot::Subscription);
        for index in order {
            if let Some(mut plugin) = self.take_plugin(index) {
                plugin.handle_subscription(self, point.clone());
                self.put_back_plugin(index, plugin);
            }
        }
    }

    /// One of this actor's points is ready to be removed; commit it and
    /// re-drive shutdown in case the point set just drained.
    pub(crate) fn on_unsubscription(
        &self,
        behavior: &mut dyn Any,
        point: SubscriptionPoint,
        external: bool,
    ) {
        let order = self
            .inner
            .guts
            .lock()
            .unwrap()
            .slot_order(Slot::Unsubscription);
        for index in order {
            if let Some(mut plugin) = self.take_plugin(index) {
                plugin.handle_unsubscription(self, point.clone(), external);
                self.put_back_plugin(index, plugin);
            }
        }
        self.drive_shutdown(behavior);
    }

    pub(crate) fn acquire_resource(&self) {
        self.inner.guts.lock().unwrap().resources += 1;
    }

    /// Returns the remaining count.
    pub(crate) fn release_resource(&self) -> u32 {
        let mut guts = self.inner.guts.lock().unwrap();
        debug_assert!(guts.resources > 0, "resource underflow at {}", self.address());
        guts.resources = guts.resources.saturating_sub(1);
        guts.resources
    }

    pub(crate) fn resources(&self) -> u32 {
        self.inner.guts.lock().unwrap().resources
    }

    /// Drop the plugin chain. Nothing will drive this cell again.
    pub(crate) fn deactivate_plugins(&self) {
        let mut guts = self.inner.guts.lock().unwrap();
        guts.plugins.clear();
        guts.init_slot.clear();
        guts.shutdown_slot.clear();
        guts.subscription_slot.clear();
        guts.unsubscription_slot.clear();
    }
}

impl fmt::Debug for ActorCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorCell({})", self.inner.address)
    }
}

/// A handle to a created actor. Holding it keeps the behavior state
/// alive independently of the supervisor; dropping it detaches nothing
/// (the supervisor still owns the actor until it is shut down).
pub struct ActorHandle<A: Actor> {
    cell: ActorCell,
    behavior: Arc<Mutex<A>>,
}

impl<A: Actor> ActorHandle<A> {
    pub(crate) fn new(cell: ActorCell, behavior: Arc<Mutex<A>>) -> Self {
        Self { cell, behavior }
    }

    /// The actor's primary address.
    pub fn address(&self) -> &Address {
        self.cell.address()
    }

    /// The actor's current lifecycle state.
    pub fn state(&self) -> ActorState {
        self.cell.state()
    }

    pub(crate) fn cell(&self) -> &ActorCell {
        &self.cell
    }

    /// Run a closure over the actor's behavior state. Must not be
    /// called from the actor's own locality thread while one of its
    /// handlers is running.
    pub fn inspect<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        f(&self.behavior.lock().unwrap())
    }
}

impl<A: Actor> Clone for ActorHandle<A> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            behavior: self.behavior.clone(),
        }
    }
}

impl<A: Actor> fmt::Debug for ActorHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorHandle({})", self.cell.address())
    }
}

/// The author-facing capability surface handed to every callback and
/// entry point. Operations that may re-drive the lifecycle take the
/// actor state explicitly, which keeps re-entry impossible by
/// construction: the state is borrowed exactly once per handler frame.
pub struct Context<'a, A: Actor> {
    cell: &'a ActorCell,
    supervisor: Supervisor,
    _marker: PhantomData<fn(&mut A)>,
}

impl<'a, A: Actor> Context<'a, A> {
    pub(crate) fn try_new(cell: &'a ActorCell) -> Option<Self> {
        let supervisor = cell.supervisor()?;
        Some(Self {
            cell,
            supervisor,
            _marker: PhantomData,
        })
    }

    /// The actor's primary address.
    pub fn address(&self) -> &Address {
        self.cell.address()
    }

    /// The owning supervisor.
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// The actor's current lifecycle state.
    pub fn state(&self) -> ActorState {
        self.cell.state()
    }

    /// Send a `P`-typed message to `destination`.
    pub fn send<P: Payload>(&self, destination: &Address, payload: P) {
        self.supervisor
            .put(Message::new(destination.clone(), payload));
    }

    /// Subscribe this actor's `P` entry point on its primary address.
    pub fn subscribe<P: Payload>(&mut self)
    where
        A: Handle<P>,
    {
        let address = self.cell.address().clone();
        self.subscribe_to::<P>(&address);
    }

    /// Subscribe this actor's `P` entry point on an arbitrary address,
    /// which may be owned by a foreign supervisor.
    pub fn subscribe_to<P: Payload>(&mut self, address: &Address)
    where
        A: Handle<P>,
    {
        let handler = Handler::entry::<A, P>(self.cell);
        self.supervisor.subscribe(address.clone(), handler);
    }

    /// Unsubscribe this actor's `P` entry point from its primary
    /// address.
    pub fn unsubscribe<P: Payload>(&mut self)
    where
        A: Handle<P>,
    {
        let address = self.cell.address().clone();
        self.unsubscribe_from::<P>(&address);
    }

    /// Unsubscribe this actor's `P` entry point from an address. The
    /// descriptor is rebuilt and matched by handler equality.
    pub fn unsubscribe_from<P: Payload>(&mut self, address: &Address)
    where
        A: Handle<P>,
    {
        let handler = Handler::entry::<A, P>(self.cell);
        self.supervisor.unsubscribe(SubscriptionPoint {
            address: address.clone(),
            handler,
        });
    }

    /// Begin a correlated request to `destination`. The request is sent
    /// when a timeout is applied to the returned builder.
    pub fn request<R: Requestable>(
        &self,
        destination: &Address,
        payload: R,
    ) -> RequestBuilder<R> {
        self.supervisor
            .do_request(destination.clone(), self.cell.address().clone(), payload)
    }

    /// Reply to a request received by this actor. The response is
    /// routed through the requester's private response address and
    /// correlated by request id.
    pub fn reply_to<R: Requestable>(&self, request: &Request<R>, response: R::Response) {
        self.supervisor.reply(request, response);
    }

    /// Resume a deferred initialization.
    pub fn init_continue(&mut self, actor: &mut A) {
        self.cell.user_resume(Slot::Init);
        self.cell.drive_init(actor);
    }

    /// Resume a deferred shutdown.
    pub fn shutdown_continue(&mut self, actor: &mut A) {
        self.cell.user_resume(Slot::Shutdown);
        self.cell.drive_shutdown(actor);
    }

    /// Block shutdown completion until a matching
    /// [`Context::release_resource`].
    pub fn acquire_resource(&self) {
        self.cell.acquire_resource();
    }

    /// Release one resource; the last release lets a pending shutdown
    /// complete.
    pub fn release_resource(&mut self, actor: &mut A) {
        if self.cell.release_resource() == 0 {
            self.cell.drive_shutdown(actor);
        }
    }

    /// Ask the owning supervisor to shut this actor down.
    pub fn initiate_shutdown(&self) {
        self.send(
            self.cell.address(),
            ShutdownRequest {
                reply_to: self.supervisor.address().clone(),
            },
        );
    }

    /// Create a sibling actor on the owning supervisor.
    pub fn create_actor<B: Actor>(&self, params: B::Params) -> anyhow::Result<ActorHandle<B>> {
        self.supervisor.create_actor::<B>(params)
    }
}
