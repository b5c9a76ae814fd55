/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The production event loop: one dedicated thread per locality,
//! running a tokio `current_thread` runtime. The pump waits on a
//! [`Notify`] (armed by the thread-safe [`EventLoop::wake`]) or the
//! nearest timer deadline, fires due timers as trigger messages, and
//! re-enters the leader supervisor's dispatch loop. The thread exits
//! once the leader completes its shutdown and its inbox drains.
//!
//! [`Notify`]: tokio::sync::Notify

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::OnceLock;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::actor::ActorState;
use crate::address::Address;
use crate::backend::EventLoop;
use crate::backend::TimerId;
use crate::backend::fire_timer;
use crate::supervisor::Supervisor;
use crate::supervisor::SupervisorShared;

struct ArmedTimer {
    deadline: Instant,
    destination: Address,
    id: TimerId,
}

struct LoopInner {
    notify: Notify,
    timers: Mutex<Vec<ArmedTimer>>,
    leader: OnceLock<Weak<SupervisorShared>>,
    stopping: AtomicBool,
}

/// A dedicated-thread tokio event loop serving one locality.
pub struct TokioLoop {
    inner: Arc<LoopInner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TokioLoop {
    /// Spawn the loop thread. The returned adapter is handed to
    /// supervisor creation; the loop idles until a leader is attached.
    pub fn spawn() -> Arc<Self> {
        let inner = Arc::new(LoopInner {
            notify: Notify::new(),
            timers: Mutex::new(Vec::new()),
            leader: OnceLock::new(),
            stopping: AtomicBool::new(false),
        });
        let pump = inner.clone();
        let thread = std::thread::Builder::new()
            .name("stator-loop".to_string())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .expect("event loop runtime");
                runtime.block_on(pump.run());
            })
            .expect("event loop thread");
        Arc::new(Self {
            inner,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Ask the loop thread to exit regardless of supervisor state.
    pub fn stop(&self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    /// Wait for the loop thread to exit. It exits on [`TokioLoop::stop`]
    /// or once the attached leader supervisor has shut down and drained
    /// its inbox.
    pub fn join(&self) {
        if let Some(thread) = self.thread.lock().unwrap().take() {
            let _ = thread.join();
        }
    }
}

impl LoopInner {
    async fn run(self: Arc<Self>) {
        loop {
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }

            let now = Instant::now();
            let due: Vec<ArmedTimer> = {
                let mut timers = self.timers.lock().unwrap();
                let (due, pending): (Vec<ArmedTimer>, Vec<ArmedTimer>) =
                    std::mem::take(&mut *timers)
                        .into_iter()
                        .partition(|t| t.deadline <= now);
                *timers = pending;
                due
            };
            for timer in due {
                fire_timer(&timer.destination, timer.id);
            }

            if let Some(leader) = self.leader.get().and_then(Weak::upgrade) {
                let sup = Supervisor::from_shared(leader);
                sup.do_process();
                if sup.state() == ActorState::ShutDown && sup.inbox_empty() {
                    tracing::debug!("{:?} shut down, event loop exiting", sup);
                    break;
                }
            } else if self.leader.get().is_some() {
                // The leader was attached once and is gone now.
                break;
            }

            let next_deadline = self
                .timers
                .lock()
                .unwrap()
                .iter()
                .map(|t| t.deadline)
                .min();
            match next_deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }
}

impl EventLoop for TokioLoop {
    fn start_timer(&self, destination: &Address, id: TimerId, duration: Duration) {
        {
            let mut timers = self.inner.timers.lock().unwrap();
            timers.retain(|t| !(t.id == id && t.destination == *destination));
            timers.push(ArmedTimer {
                deadline: Instant::now() + duration,
                destination: destination.clone(),
                id,
            });
        }
        self.inner.notify.notify_one();
    }

    fn cancel_timer(&self, destination: &Address, id: TimerId) {
        self.inner
            .timers
            .lock()
            .unwrap()
            .retain(|t| !(t.id == id && t.destination == *destination));
    }

    fn wake(&self) {
        self.inner.notify.notify_one();
    }

    fn attach(&self, supervisor: &Supervisor) {
        if self.inner.leader.set(Arc::downgrade(&supervisor.shared)).is_err() {
            debug_assert!(false, "event loop already has a leader");
        }
        self.inner.notify.notify_one();
    }
}
