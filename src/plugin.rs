/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Lifecycle plugins. Each actor carries a small chain of plugins that
//! participate in one or more slots; initialization and shutdown
//! progress by iterating a slot in order until a plugin reports that it
//! is not done yet, and re-driving when one of its gates opens.
//!
//! The built-in chain is: init/shutdown bookkeeping (request slots and
//! final replies), subscription-point lifetime, the resource gate, the
//! user behavior bridge, and, for supervisors, the child cascade.

use std::any::Any;
use std::marker::PhantomData;

use crate::actor::Actor;
use crate::actor::ActorCell;
use crate::actor::ActorState;
use crate::actor::Context;
use crate::handler::Handler;
use crate::message::CommitUnsubscription;
use crate::message::ExternalUnsubscription;
use crate::message::InitRequest;
use crate::message::Message;
use crate::message::ShutdownRequest;
use crate::message::StartActor;
use crate::message::SubscriptionConfirmation;
use crate::message::UnsubscriptionConfirmation;
use crate::subscription::SubscriptionPoint;
use crate::supervisor::Supervisor;

/// The slots a plugin can participate in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Init,
    Shutdown,
    Subscription,
    Unsubscription,
}

/// A lifecycle extension point. `handle_init` and `handle_shutdown`
/// return whether the plugin's work for that phase is done; a `false`
/// parks the slot until the next drive.
pub(crate) trait Plugin: Send {
    fn handle_init(&mut self, _cell: &ActorCell, _behavior: &mut dyn Any) -> bool {
        true
    }

    fn handle_shutdown(&mut self, _cell: &ActorCell, _behavior: &mut dyn Any) -> bool {
        true
    }

    /// The user explicitly resumed the given slot.
    fn note_user_resume(&mut self, _slot: Slot) {}

    fn handle_subscription(&mut self, _cell: &ActorCell, _point: SubscriptionPoint) {}

    fn handle_unsubscription(
        &mut self,
        _cell: &ActorCell,
        _point: SubscriptionPoint,
        _external: bool,
    ) {
    }
}

/// Owns the pending init/shutdown request slots. Final participant of
/// both phases: replies to the requester and, on shutdown, performs the
/// terminal transition.
struct InitShutdownPlugin {
    supervisor: bool,
}

impl Plugin for InitShutdownPlugin {
    fn handle_init(&mut self, cell: &ActorCell, _behavior: &mut dyn Any) -> bool {
        cell.reply_init();
        true
    }

    fn handle_shutdown(&mut self, cell: &ActorCell, _behavior: &mut dyn Any) -> bool {
        if cell.state() == ActorState::ShutDown {
            return true;
        }
        if self.supervisor {
            if let Some(sup) = cell.supervisor() {
                sup.finalize_shutdown();
            }
        }
        cell.set_state(ActorState::ShutDown);
        if let Some(sup) = cell.supervisor() {
            // Framework handlers are not protocol points; purge them
            // directly so no table references the terminal actor.
            sup.purge_actor(cell);
        }
        cell.reply_shutdown();
        cell.deactivate_plugins();
        tracing::debug!("{} shut down", cell.address());
        true
    }
}

/// Tracks the subscription points the actor created, and tears them
/// down in reverse registration order during shutdown. The point set
/// draining is one of the shutdown gates.
#[derive(Default)]
struct LifetimePlugin {
    points: Vec<SubscriptionPoint>,
    teardown_started: bool,
}

impl Plugin for LifetimePlugin {
    fn handle_shutdown(&mut self, cell: &ActorCell, _behavior: &mut dyn Any) -> bool {
        if self.points.is_empty() {
            return true;
        }
        if !self.teardown_started {
            self.teardown_started = true;
            if let Some(sup) = cell.supervisor() {
                for point in self.points.iter().rev() {
                    sup.unsubscribe(point.clone());
                }
            }
        }
        false
    }

    fn handle_subscription(&mut self, _cell: &ActorCell, point: SubscriptionPoint) {
        self.points.push(point);
    }

    fn handle_unsubscription(
        &mut self,
        cell: &ActorCell,
        point: SubscriptionPoint,
        external: bool,
    ) {
        if external {
            // The address owner lives elsewhere; route the commit to it.
            // The owner (or its whole locality) may already be gone, in
            // which case there is nothing left to remove.
            if let (Some(own), Some(owner)) = (cell.supervisor(), point.address.supervisor()) {
                own.put(Message::new(
                    owner.address().clone(),
                    CommitUnsubscription {
                        point: point.clone(),
                    },
                ));
            }
        } else if let Some(owner) = point.address.supervisor() {
            owner.commit_unsubscription(&point);
        }

        match self.points.iter().rposition(|p| p == &point) {
            Some(index) => {
                self.points.remove(index);
            }
            None => {
                debug_assert!(false, "no subscription point recorded for {:?}", point);
            }
        }
    }
}

/// Blocks shutdown completion while the actor holds resources.
struct ResourcesPlugin;

impl Plugin for ResourcesPlugin {
    fn handle_shutdown(&mut self, cell: &ActorCell, _behavior: &mut dyn Any) -> bool {
        cell.resources() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookState {
    Pending,
    Deferred,
    Done,
}

/// Bridges the user's [`Actor`] callbacks into the slot machinery. A
/// hook returning `false` parks its slot until the matching explicit
/// continuation arrives; internal re-drives leave a deferred hook
/// parked.
struct BehaviorPlugin<A> {
    init: HookState,
    shutdown: HookState,
    _marker: PhantomData<fn(A)>,
}

impl<A> Default for BehaviorPlugin<A> {
    fn default() -> Self {
        Self {
            init: HookState::Pending,
            shutdown: HookState::Pending,
            _marker: PhantomData,
        }
    }
}

impl<A: Actor> BehaviorPlugin<A> {
    fn run_hook(
        state: &mut HookState,
        cell: &ActorCell,
        behavior: &mut dyn Any,
        hook: impl FnOnce(&mut A, &mut Context<'_, A>) -> bool,
    ) -> bool {
        match *state {
            HookState::Done => true,
            HookState::Deferred => false,
            HookState::Pending => {
                let actor = behavior
                    .downcast_mut::<A>()
                    .expect("behavior type mismatch");
                let Some(mut ctx) = Context::try_new(cell) else {
                    return false;
                };
                if hook(actor, &mut ctx) {
                    *state = HookState::Done;
                    true
                } else {
                    *state = HookState::Deferred;
                    false
                }
            }
        }
    }
}

impl<A: Actor> Plugin for BehaviorPlugin<A> {
    fn handle_init(&mut self, cell: &ActorCell, behavior: &mut dyn Any) -> bool {
        Self::run_hook(&mut self.init, cell, behavior, |actor, ctx| {
            actor.on_initialize(ctx)
        })
    }

    fn handle_shutdown(&mut self, cell: &ActorCell, behavior: &mut dyn Any) -> bool {
        Self::run_hook(&mut self.shutdown, cell, behavior, |actor, ctx| {
            actor.on_shutdown(ctx)
        })
    }

    fn note_user_resume(&mut self, slot: Slot) {
        let state = match slot {
            Slot::Init => &mut self.init,
            Slot::Shutdown => &mut self.shutdown,
            _ => return,
        };
        if *state == HookState::Deferred {
            *state = HookState::Done;
        }
    }
}

/// Supervisor-only cascade gate: asks every child to shut down, and
/// completes once the child map drains.
#[derive(Default)]
struct ChildrenPlugin {
    requested: bool,
}

impl Plugin for ChildrenPlugin {
    fn handle_shutdown(&mut self, cell: &ActorCell, _behavior: &mut dyn Any) -> bool {
        let Some(sup) = cell.supervisor() else {
            return true;
        };
        if sup.children_empty() {
            return true;
        }
        if !self.requested {
            self.requested = true;
            sup.request_children_shutdown();
        }
        false
    }
}

// Chain layout. Slot orderings index into this vector.
const INIT_SHUTDOWN: usize = 0;
const LIFETIME: usize = 1;
const RESOURCES: usize = 2;
const BEHAVIOR: usize = 3;
const CHILDREN: usize = 4;

/// Install the plugin chain for a freshly constructed actor and
/// subscribe its control-plane handlers. `supervisor` selects the
/// supervisor variant of the chain (child cascade plus shutdown timer).
pub(crate) fn activate<A: Actor>(cell: &ActorCell, supervisor: bool) {
    let mut plugins: Vec<Box<dyn Plugin>> = vec![
        Box::new(InitShutdownPlugin { supervisor }),
        Box::new(LifetimePlugin::default()),
        Box::new(ResourcesPlugin),
        Box::new(BehaviorPlugin::<A>::default()),
    ];
    // Resources gate ahead of point teardown: an actor pinned by a
    // resource keeps its entry points until the last release, so the
    // releasing message can still reach it.
    let shutdown_slot = if supervisor {
        plugins.push(Box::new(ChildrenPlugin::default()));
        vec![CHILDREN, BEHAVIOR, RESOURCES, LIFETIME, INIT_SHUTDOWN]
    } else {
        vec![BEHAVIOR, RESOURCES, LIFETIME, INIT_SHUTDOWN]
    };
    cell.install_plugins(
        plugins,
        vec![BEHAVIOR, INIT_SHUTDOWN],
        shutdown_slot,
        vec![LIFETIME],
        vec![LIFETIME],
    );
    subscribe_control_handlers::<A>(cell, supervisor);
}

/// Subscribe the actor's control-plane entry points on its primary
/// address. These are framework subscriptions: recorded directly in the
/// owner's table, with no confirmation round-trip and no lifetime
/// point, and purged when the actor reaches its terminal state.
fn subscribe_control_handlers<A: Actor>(cell: &ActorCell, supervisor: bool) {
    let Some(sup) = cell.supervisor() else {
        return;
    };
    let behavior = cell.behavior::<A>();
    let address = cell.address().clone();

    let handler = {
        let cell = cell.clone();
        let behavior = behavior.clone();
        Handler::bind::<InitRequest>(cell.clone(), move |msg| {
            let mut actor = behavior.lock().unwrap();
            if cell.begin_init(msg.clone()) {
                tracing::debug!("{} initializing", cell.address());
                cell.drive_init(&mut *actor as &mut dyn Any);
            }
        })
    };
    sup.subscribe_system(address.clone(), handler);

    let handler = {
        let cell = cell.clone();
        let behavior = behavior.clone();
        Handler::bind::<StartActor>(cell.clone(), move |_| {
            let mut actor = behavior.lock().unwrap();
            if cell.finish_start() {
                tracing::debug!("{} operational", cell.address());
                if let Some(mut ctx) = Context::try_new(&cell) {
                    actor.on_start(&mut ctx);
                }
            }
        })
    };
    sup.subscribe_system(address.clone(), handler);

    let handler = {
        let cell = cell.clone();
        let behavior = behavior.clone();
        Handler::bind::<ShutdownRequest>(cell.clone(), move |msg| {
            let mut actor = behavior.lock().unwrap();
            if cell.begin_shutdown(msg.clone()) {
                tracing::debug!("{} shutting down", cell.address());
                if supervisor {
                    if let Some(sup) = cell.supervisor() {
                        sup.arm_shutdown_timer();
                    }
                }
                cell.drive_shutdown(&mut *actor as &mut dyn Any);
            }
        })
    };
    sup.subscribe_system(address.clone(), handler);

    let handler = {
        let cell = cell.clone();
        Handler::bind::<SubscriptionConfirmation>(cell.clone(), move |msg| {
            if let Some(confirmation) = msg.downcast_ref::<SubscriptionConfirmation>() {
                cell.on_subscription(confirmation.point.clone());
            }
        })
    };
    sup.subscribe_system(address.clone(), handler);

    let handler = {
        let cell = cell.clone();
        let behavior = behavior.clone();
        Handler::bind::<UnsubscriptionConfirmation>(cell.clone(), move |msg| {
            if let Some(confirmation) = msg.downcast_ref::<UnsubscriptionConfirmation>() {
                let mut actor = behavior.lock().unwrap();
                cell.on_unsubscription(
                    &mut *actor as &mut dyn Any,
                    confirmation.point.clone(),
                    false,
                );
            }
        })
    };
    sup.subscribe_system(address.clone(), handler);

    let handler = {
        let cell = cell.clone();
        Handler::bind::<ExternalUnsubscription>(cell.clone(), move |msg| {
            if let Some(unsubscription) = msg.downcast_ref::<ExternalUnsubscription>() {
                let mut actor = behavior.lock().unwrap();
                cell.on_unsubscription(
                    &mut *actor as &mut dyn Any,
                    unsubscription.point.clone(),
                    true,
                );
            }
        })
    };
    sup.subscribe_system(address, handler);
}

/// Helper for supervisor construction: gives the supervisor module a
/// handle to the supervisor's own control-plane activation without
/// leaking the chain layout.
pub(crate) fn activate_supervisor_cell(cell: &ActorCell, _sup: &Supervisor) {
    activate::<crate::supervisor::SupervisorCore>(cell, true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestRig;

    #[derive(Debug)]
    struct Proceed;

    /// Defers init until an external message arrives.
    #[derive(Debug)]
    struct SlowStarter {
        started: bool,
    }

    impl Actor for SlowStarter {
        type Params = ();

        fn new(_params: ()) -> anyhow::Result<Self> {
            Ok(Self { started: false })
        }

        fn on_initialize(&mut self, ctx: &mut Context<'_, Self>) -> bool {
            ctx.subscribe::<Proceed>();
            false
        }

        fn on_start(&mut self, _ctx: &mut Context<'_, Self>) {
            self.started = true;
        }
    }

    impl Handle<Proceed> for SlowStarter {
        fn handle(&mut self, ctx: &mut Context<'_, Self>, _message: &Proceed) {
            ctx.init_continue(self);
        }
    }

    use crate::actor::Handle;

    #[test]
    fn test_deferred_init() {
        let rig = TestRig::new();
        let actor = rig.sup.create_actor::<SlowStarter>(()).unwrap();
        rig.sup.start();
        rig.sup.do_process();
        assert_eq!(actor.state(), ActorState::Initializing);
        assert!(!actor.inspect(|a| a.started));

        rig.sup
            .put(Message::new(actor.address().clone(), Proceed));
        rig.sup.do_process();
        assert_eq!(actor.state(), ActorState::Operational);
        assert!(actor.inspect(|a| a.started));
    }

    /// Holds a resource from init until poked.
    #[derive(Debug)]
    struct ResourceHolder;

    impl Actor for ResourceHolder {
        type Params = ();

        fn new(_params: ()) -> anyhow::Result<Self> {
            Ok(Self)
        }

        fn on_initialize(&mut self, ctx: &mut Context<'_, Self>) -> bool {
            ctx.acquire_resource();
            ctx.subscribe::<Proceed>();
            true
        }
    }

    impl Handle<Proceed> for ResourceHolder {
        fn handle(&mut self, ctx: &mut Context<'_, Self>, _message: &Proceed) {
            ctx.release_resource(self);
        }
    }

    /// Defers shutdown until an external message arrives.
    #[derive(Debug)]
    struct SlowStopper {
        draining: bool,
    }

    impl Actor for SlowStopper {
        type Params = ();

        fn new(_params: ()) -> anyhow::Result<Self> {
            Ok(Self { draining: false })
        }

        fn on_initialize(&mut self, ctx: &mut Context<'_, Self>) -> bool {
            ctx.subscribe::<Proceed>();
            true
        }

        fn on_shutdown(&mut self, _ctx: &mut Context<'_, Self>) -> bool {
            self.draining = true;
            false
        }
    }

    impl Handle<Proceed> for SlowStopper {
        fn handle(&mut self, ctx: &mut Context<'_, Self>, _message: &Proceed) {
            if self.draining {
                ctx.shutdown_continue(self);
            }
        }
    }

    #[test]
    fn test_deferred_shutdown() {
        let rig = TestRig::new();
        let actor = rig.sup.create_actor::<SlowStopper>(()).unwrap();
        rig.sup.start();
        rig.sup.do_process();

        rig.sup.shutdown();
        rig.sup.do_process();
        // Parked on the user hook; entry points are still live.
        assert_eq!(actor.state(), ActorState::ShuttingDown);

        rig.sup
            .put(Message::new(actor.address().clone(), Proceed));
        rig.sup.do_process();
        assert_eq!(actor.state(), ActorState::ShutDown);
        assert_eq!(rig.sup.state(), ActorState::ShutDown);
    }

    /// Stops itself after the first nudge.
    #[derive(Debug)]
    struct OneShot;

    impl Actor for OneShot {
        type Params = ();

        fn new(_params: ()) -> anyhow::Result<Self> {
            Ok(Self)
        }

        fn on_initialize(&mut self, ctx: &mut Context<'_, Self>) -> bool {
            ctx.subscribe::<Proceed>();
            true
        }
    }

    impl Handle<Proceed> for OneShot {
        fn handle(&mut self, ctx: &mut Context<'_, Self>, _message: &Proceed) {
            ctx.initiate_shutdown();
        }
    }

    #[test]
    fn test_actor_initiated_shutdown() {
        let rig = TestRig::new();
        let actor = rig.sup.create_actor::<OneShot>(()).unwrap();
        rig.sup.start();
        rig.sup.do_process();

        rig.sup
            .put(Message::new(actor.address().clone(), Proceed));
        rig.sup.do_process();

        // The actor wound down on its own; the supervisor forgot it and
        // stayed operational.
        assert_eq!(actor.state(), ActorState::ShutDown);
        assert_eq!(rig.sup.state(), ActorState::Operational);
        assert!(rig.sup.children_empty());
    }

    #[test]
    fn test_resource_gates_shutdown() {
        let rig = TestRig::new();
        let actor = rig.sup.create_actor::<ResourceHolder>(()).unwrap();
        rig.sup.start();
        rig.sup.do_process();
        assert_eq!(actor.state(), ActorState::Operational);

        rig.sup.shutdown();
        rig.sup.do_process();
        // The resource pins the actor mid-shutdown, entry points intact.
        assert_eq!(actor.state(), ActorState::ShuttingDown);
        assert_eq!(rig.sup.state(), ActorState::ShuttingDown);

        rig.sup
            .put(Message::new(actor.address().clone(), Proceed));
        rig.sup.do_process();
        assert_eq!(actor.state(), ActorState::ShutDown);
        assert_eq!(rig.sup.state(), ActorState::ShutDown);
    }
}
