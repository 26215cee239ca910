//! # WorkerWatchdog: parent-side watcher of the single worker.
//!
//! Keyed to the current worker pid. Child notifications come in two shapes:
//! genuine deaths (reaped by the SIGCHLD route) and periodic [`ExitKind::Tick`]s
//! scheduled every `watchdog_interval` while the worker lives.
//!
//! ## Decision table
//! ```text
//! pid != watched worker            ──► Ignore
//! Tick                             ──► Rearm   (schedule next tick)
//! death, Stopping or reloading     ──► Forget  (invalidate handle only)
//! death, policy enabled            ──► Respawn (log "Respawning", Respawn event after delay)
//! death, policy disabled           ──► Terminate (log "Exiting", Terminate event)
//! ```
//!
//! ## Rules
//! - The decision ([`WorkerWatchdog::decide`]) is pure; effects are applied by
//!   [`WorkerWatchdog::on_child_signal`] on the caller's run loop.
//! - Every death invalidates the handle, whatever the action.
//! - Ticks of a replaced worker are ignored, so their chain ends with it.

use std::time::Duration;

use nix::unistd::Pid;
use tracing::{debug, error, info, warn};

use crate::core::launcher::{ExitKind, WorkerHandle};
use crate::core::runloop::RunLoop;
use crate::core::signals::{ChildTable, SignalRouter};
use crate::core::state::SupervisorState;
use crate::events::{ControlEvent, EventKind};
use crate::policies::RespawnPolicy;

/// What the watchdog did with a child notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    /// Not the watched worker.
    Ignore,
    /// Worker alive; next tick scheduled.
    Rearm,
    /// Worker gone during teardown; handle invalidated, nothing else.
    Forget,
    /// Worker died; a relaunch is due after the delay.
    Respawn {
        /// Delay before the `Respawn` event fires.
        after: Duration,
    },
    /// Worker died and respawn is disabled; the supervisor must terminate.
    Terminate,
}

impl WatchAction {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            WatchAction::Ignore => "ignore",
            WatchAction::Rearm => "rearm",
            WatchAction::Forget => "forget",
            WatchAction::Respawn { .. } => "respawn",
            WatchAction::Terminate => "terminate",
        }
    }
}

/// Watches the current worker and applies the [`RespawnPolicy`] on its death.
pub struct WorkerWatchdog {
    policy: RespawnPolicy,
    interval: Duration,
    children: ChildTable,
    current: Option<WorkerHandle>,
}

impl WorkerWatchdog {
    /// Creates a watchdog reaping through `children`.
    pub fn new(policy: RespawnPolicy, interval: Duration, children: ChildTable) -> Self {
        Self {
            policy,
            interval,
            children,
            current: None,
        }
    }

    /// Handle of the live worker, if any.
    pub fn current(&self) -> Option<&WorkerHandle> {
        self.current.as_ref()
    }

    /// Respawn policy in force.
    pub fn policy(&self) -> RespawnPolicy {
        self.policy
    }

    /// Starts watching `handle`: pid routed for reaping, first tick scheduled.
    ///
    /// A death that happened before registration is picked up right away.
    pub fn register(&mut self, handle: WorkerHandle, rl: &RunLoop) {
        let pid = handle.pid();
        self.children.watch(pid);
        self.current = Some(handle);
        rl.schedule_event(ControlEvent::tick(pid), self.interval);
        SignalRouter::sweep(&self.children, &rl.queue());
        debug!(pid = %pid, interval = ?self.interval, "worker registered with watchdog");
    }

    /// Pure decision for a child notification.
    pub fn decide(&self, pid: Pid, exit: ExitKind, state: SupervisorState) -> WatchAction {
        let watched = self.current.as_ref().map(WorkerHandle::pid);
        if watched != Some(pid) {
            return WatchAction::Ignore;
        }
        if exit.is_tick() {
            return WatchAction::Rearm;
        }
        if state.is_stopping() || state == SupervisorState::Reloading {
            return WatchAction::Forget;
        }
        if self.policy.enabled {
            WatchAction::Respawn {
                after: self.policy.delay,
            }
        } else {
            WatchAction::Terminate
        }
    }

    /// Decides and applies the effects of a child notification on `rl`.
    pub fn on_child_signal(
        &mut self,
        pid: Pid,
        exit: ExitKind,
        state: SupervisorState,
        rl: &RunLoop,
    ) -> WatchAction {
        let action = self.decide(pid, exit, state);

        if !exit.is_tick() && action != WatchAction::Ignore {
            self.current = None;
            self.children.forget(pid);
        }

        match action {
            WatchAction::Ignore => {
                debug!(pid = %pid, exit = %exit, "child notification for unwatched pid ignored");
            }
            WatchAction::Rearm => {
                rl.schedule_event(ControlEvent::tick(pid), self.interval);
            }
            WatchAction::Forget => {
                info!(pid = %pid, exit = %exit, state = %state, "worker process({pid}) stopped");
            }
            WatchAction::Respawn { after } => {
                warn!(
                    pid = %pid,
                    exit = %exit,
                    action = action.as_label(),
                    delay = ?after,
                    "worker process({pid}) died: Respawning"
                );
                rl.schedule_event(ControlEvent::new(EventKind::Respawn).with_pid(pid), after);
            }
            WatchAction::Terminate => {
                error!(
                    pid = %pid,
                    exit = %exit,
                    action = action.as_label(),
                    "worker process({pid}) died: Exiting"
                );
                rl.queue().publish(ControlEvent::terminate());
            }
        }
        action
    }
}
