/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The system context: the process-level entry point that creates root
//! supervisors and receives fatal reports.
//!
//! Non-fatal failures travel as ordinary messages (a timed-out request
//! is answered with a timeout response). Fatal failures, a supervisor
//! whose shutdown timer expired or an adapter that can no longer make
//! progress, are reported here; the core does not attempt to recover a
//! stuck locality, so the default reaction is to log and abort the
//! process. Embedders (and tests) can install a hook to observe the
//! report instead.

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use crate::address::Address;
use crate::backend::EventLoop;
use crate::supervisor::Supervisor;
use crate::supervisor::SupervisorOptions;

/// Failures the core cannot express as messages.
#[derive(thiserror::Error, Debug)]
pub enum FatalError {
    /// A supervisor's shutdown did not complete within its timeout.
    #[error("shutdown timed out for supervisor at {supervisor}")]
    ShutdownTimeout {
        /// The supervisor that failed to wind down.
        supervisor: Address,
    },

    /// An event-loop adapter reported that it cannot make progress.
    #[error("event loop adapter failure: {0}")]
    Adapter(String),
}

type FatalHook = Box<dyn FnMut(FatalError) + Send>;

#[derive(Default)]
struct SystemState {
    fatal_hook: Mutex<Option<FatalHook>>,
}

/// The system context. Cheap to clone; every supervisor created through
/// it keeps a handle for fatal reporting.
#[derive(Clone, Default)]
pub struct System {
    state: Arc<SystemState>,
}

impl System {
    /// A fresh system context with the default (abort) fatal reaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a root supervisor leading a fresh locality on the given
    /// event loop.
    pub fn create_supervisor(
        &self,
        backend: Arc<dyn EventLoop>,
        options: SupervisorOptions,
    ) -> Supervisor {
        Supervisor::new_root(self, backend, options)
    }

    /// Replace the fatal reaction. Without a hook, a fatal report logs
    /// the error and aborts the process.
    pub fn set_fatal_hook(&self, hook: impl FnMut(FatalError) + Send + 'static) {
        *self.state.fatal_hook.lock().unwrap() = Some(Box::new(hook));
    }

    /// Report an unrecoverable failure. Adapters use this for errors
    /// the core cannot observe itself.
    pub fn report_fatal(&self, error: FatalError) {
        let mut hook = self.state.fatal_hook.lock().unwrap();
        match hook.as_mut() {
            Some(hook) => hook(error),
            None => {
                tracing::error!("fatal: {error}");
                std::process::abort();
            }
        }
    }
}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("System").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::*;
    use crate::actor::ActorState;
    use crate::test_utils::TestRig;

    #[test]
    fn test_shutdown_timer_expiry_is_fatal() {
        let rig = TestRig::new();
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        rig.system.set_fatal_hook(move |error| {
            sink.lock().unwrap().push(error.to_string());
        });

        // Pin the supervisor mid-shutdown so its timer stays armed.
        rig.sup.cell().acquire_resource();
        rig.sup.start();
        rig.sup.do_process();
        rig.sup.shutdown();
        rig.sup.do_process();
        assert_eq!(rig.sup.state(), ActorState::ShuttingDown);

        rig.backend.fire_all();
        rig.sup.do_process();
        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].contains("shutdown timed out"));
    }
}
