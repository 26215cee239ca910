//! # Supervisor: parent-side driver of the single worker.
//!
//! The [`Supervisor`] owns the launcher, the [`WorkerWatchdog`], its run loop and
//! the parent [`SupervisorState`]. It never reloads itself: operator requests are
//! forwarded to the worker or turned into a controlled stop.
//!
//! ## High-level architecture
//! ```text
//! run():
//!   SIGPIPE ignored, child routes + operator routes on the loop
//!   launch() ──► WorkerWatchdog::register(handle)
//!
//! loop over RunLoop::next_event():
//!   Reload        ──► SIGHUP to the worker
//!   Child(pid, x) ──► watchdog.on_child_signal()
//!                       ├─ Rearm / Ignore  → nothing
//!                       ├─ Respawn         → Respawning, Respawn event after delay
//!                       ├─ Terminate       → outcome WorkerLost, Terminate queued
//!                       └─ Forget          → (Stopping) worker gone → exit loop
//!   Respawn       ──► launch() ──► register ──► Running     (launch error → Fatal)
//!   Terminate     ──► Stopping: SIGTERM to the worker, GraceExpired after `grace`
//!   GraceExpired  ──► SIGKILL, RuntimeError::GraceExceeded logged
//!
//! Shutdown path:
//!   routes disabled ──► loop destroyed ──► Stopped ──► Outcome
//! ```
//!
//! ## Rules
//! - A death observed while stopping is never respawned.
//! - The supervisor waits for the worker's death before returning, bounded by
//!   `grace` plus the SIGKILL.

use nix::sys::signal::{kill, Signal};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::launcher::{ExitKind, Launch, Launched, WorkerHandle};
use crate::core::runloop::RunLoop;
use crate::core::shutdown::Outcome;
use crate::core::signals::{ChildTable, SignalRouter};
use crate::core::state::{self, Role, SupervisorState};
use crate::core::watchdog::{WatchAction, WorkerWatchdog};
use crate::error::{LaunchError, RuntimeError};
use crate::events::{ControlEvent, EventKind, EventQueue};

/// Whether the event loop keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Parent control process.
pub struct Supervisor<L: Launch> {
    cfg: Config,
    launcher: L,
    run_loop: RunLoop,
    children: ChildTable,
    watchdog: WorkerWatchdog,
    state: SupervisorState,
    outcome: Outcome,
    launches: u64,
}

impl<L: Launch> Supervisor<L> {
    /// Creates a supervisor and its run loop. Nothing is launched yet.
    pub fn new(cfg: Config, launcher: L) -> Result<Self, RuntimeError> {
        let run_loop = RunLoop::create().map_err(RuntimeError::RunLoop)?;
        let children = ChildTable::new();
        let watchdog = WorkerWatchdog::new(cfg.respawn, cfg.watchdog_interval, children.clone());

        Ok(Self {
            cfg,
            launcher,
            run_loop,
            children,
            watchdog,
            state: SupervisorState::Starting,
            outcome: Outcome::Clean,
            launches: 0,
        })
    }

    /// Queue of the supervisor's run loop (for in-process requests).
    pub fn queue(&self) -> EventQueue {
        self.run_loop.queue()
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Launches the first worker, then supervises until stopped.
    pub fn run(self) -> Outcome {
        self.drive(None)
    }

    /// Supervises `first`, a worker already launched by the caller.
    pub fn run_with(self, first: WorkerHandle) -> Outcome {
        self.drive(Some(first))
    }

    fn drive(mut self, first: Option<WorkerHandle>) -> Outcome {
        state::set_role(Role::Supervisor);
        if let Err(e) = SignalRouter::ignore_broken_pipe() {
            warn!(error = %e, "cannot ignore SIGPIPE");
        }

        let routes = SignalRouter::children(&self.run_loop, &self.children).and_then(|child| {
            SignalRouter::operator(&self.run_loop).map(|operator| (child, operator))
        });
        let (child_routes, operator_routes) = match routes {
            Ok(routes) => routes,
            Err(e) => {
                let err = RuntimeError::RunLoop(e);
                error!(label = err.as_label(), error = %err, "cannot install signal routes");
                return self.finish(Outcome::Fatal);
            }
        };

        let handle = match first {
            Some(handle) => Ok(handle),
            None => self.launch_worker(),
        };
        match handle {
            Ok(handle) => {
                self.launches += 1;
                self.watchdog.register(handle, &self.run_loop);
                self.state = SupervisorState::Running;
            }
            Err(e) => {
                let err = RuntimeError::from(e);
                error!(label = err.as_label(), error = %err, "initial launch failed");
                operator_routes.disable();
                child_routes.disable();
                return self.finish(Outcome::Fatal);
            }
        }

        while let Some(ev) = self.run_loop.next_event() {
            if self.handle(ev) == Flow::Stop {
                break;
            }
        }

        operator_routes.disable();
        child_routes.disable();
        let outcome = self.outcome;
        self.finish(outcome)
    }

    fn finish(self, outcome: Outcome) -> Outcome {
        let pending = self.run_loop.destroy();
        debug!(pending = pending.len(), "supervisor run loop destroyed");
        info!(outcome = %outcome, launches = self.launches, "supervisor stopped");
        outcome
    }

    fn launch_worker(&mut self) -> Result<WorkerHandle, LaunchError> {
        match self.launcher.launch()? {
            Launched::Parent(handle) => Ok(handle),
            Launched::Worker(_) => Err(LaunchError::UnexpectedWorker),
        }
    }

    fn handle(&mut self, ev: ControlEvent) -> Flow {
        match ev.kind {
            EventKind::Reload => {
                self.forward_reload();
                Flow::Continue
            }
            EventKind::Terminate => self.begin_stop(),
            EventKind::Child => {
                let Some(pid) = ev.pid else {
                    return Flow::Continue;
                };
                let exit = ev.exit.unwrap_or(ExitKind::Unknown);
                match self
                    .watchdog
                    .on_child_signal(pid, exit, self.state, &self.run_loop)
                {
                    WatchAction::Ignore | WatchAction::Rearm => Flow::Continue,
                    WatchAction::Forget if self.state.is_stopping() => Flow::Stop,
                    WatchAction::Forget => Flow::Continue,
                    WatchAction::Respawn { .. } => {
                        self.state = SupervisorState::Respawning;
                        Flow::Continue
                    }
                    WatchAction::Terminate => {
                        self.outcome = self.outcome.escalate(Outcome::WorkerLost);
                        Flow::Continue
                    }
                }
            }
            EventKind::Respawn => self.respawn(),
            EventKind::GraceExpired => self.grace_expired(ev),
        }
    }

    fn forward_reload(&self) {
        if self.state.is_stopping() {
            info!("reload ignored while stopping");
            return;
        }
        match self.watchdog.current() {
            Some(worker) => {
                info!(pid = %worker.pid(), "forwarding reload to worker");
                if let Err(e) = kill(worker.pid(), Signal::SIGHUP) {
                    warn!(pid = %worker.pid(), error = %e, "cannot signal worker");
                }
            }
            None => info!(state = %self.state, "reload ignored: no live worker"),
        }
    }

    fn respawn(&mut self) -> Flow {
        if self.state != SupervisorState::Respawning {
            debug!(state = %self.state, "stale respawn event ignored");
            return Flow::Continue;
        }
        match self.launch_worker() {
            Ok(handle) => {
                self.launches += 1;
                self.watchdog.register(handle, &self.run_loop);
                self.state = SupervisorState::Running;
                Flow::Continue
            }
            Err(e) => {
                let err = RuntimeError::from(e);
                error!(label = err.as_label(), error = %err, "worker respawn failed");
                self.outcome = self.outcome.escalate(Outcome::Fatal);
                self.begin_stop()
            }
        }
    }

    fn begin_stop(&mut self) -> Flow {
        if self.state.is_stopping() {
            return Flow::Continue;
        }
        self.state = SupervisorState::Stopping;

        let Some(worker) = self.watchdog.current() else {
            info!(outcome = %self.outcome, "stopping supervisor");
            return Flow::Stop;
        };
        let pid = worker.pid();
        let grace = self.cfg.stop_grace().unwrap_or_default();
        info!(pid = %pid, grace = ?grace, outcome = %self.outcome, "stopping worker");

        if let Err(e) = kill(pid, Signal::SIGTERM) {
            // ESRCH: already reaped; the sweep reports it as gone.
            debug!(pid = %pid, error = %e, "cannot signal worker");
            SignalRouter::sweep(&self.children, &self.run_loop.queue());
        }
        self.run_loop
            .schedule_event(ControlEvent::new(EventKind::GraceExpired).with_pid(pid), grace);
        Flow::Continue
    }

    fn grace_expired(&mut self, ev: ControlEvent) -> Flow {
        let Some(worker) = self.watchdog.current() else {
            return Flow::Continue;
        };
        let pid = worker.pid();
        if ev.pid != Some(pid) || !self.state.is_stopping() {
            return Flow::Continue;
        }

        let err = RuntimeError::GraceExceeded {
            grace: self.cfg.grace,
            pid: pid.as_raw(),
        };
        error!(label = err.as_label(), error = %err, "worker did not stop in time");
        match kill(pid, Signal::SIGKILL) {
            Ok(()) => Flow::Continue,
            Err(e) => {
                warn!(pid = %pid, error = %e, "cannot kill worker");
                Flow::Stop
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::Duration;

    use nix::unistd::Pid;

    use crate::policies::RespawnPolicy;

    /// Launches `/bin/sh -c <script>` children.
    struct ShellLauncher {
        script: &'static str,
        launched: u64,
    }

    impl Launch for ShellLauncher {
        fn launch(&mut self) -> Result<Launched, LaunchError> {
            let child = Command::new("/bin/sh")
                .arg("-c")
                .arg(self.script)
                .spawn()
                .map_err(|source| LaunchError::Spawn { source })?;
            self.launched += 1;
            Ok(Launched::Parent(WorkerHandle::new(
                Pid::from_raw(child.id() as i32),
                self.launched,
            )))
        }
    }

    struct WorkerOnly;

    impl Launch for WorkerOnly {
        fn launch(&mut self) -> Result<Launched, LaunchError> {
            Ok(Launched::Worker(crate::core::launcher::WorkerView {
                parent: Pid::this(),
                started_at: std::time::SystemTime::now(),
            }))
        }
    }

    fn config(respawn: RespawnPolicy, grace: Duration) -> Config {
        Config {
            respawn,
            grace,
            ..Config::default()
        }
    }

    #[test]
    fn test_terminate_stops_live_worker() {
        let launcher = ShellLauncher {
            script: "sleep 30",
            launched: 0,
        };
        let sup = Supervisor::new(config(RespawnPolicy::default(), Duration::from_secs(5)), launcher)
            .unwrap();
        sup.queue().publish(ControlEvent::terminate());
        assert_eq!(sup.run(), Outcome::Clean);
    }

    #[test]
    fn test_grace_expiry_kills_worker() {
        let launcher = ShellLauncher {
            script: "trap '' TERM; sleep 30",
            launched: 0,
        };
        let sup = Supervisor::new(config(RespawnPolicy::default(), Duration::from_millis(200)), launcher)
            .unwrap();
        let queue = sup.queue();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            queue.publish(ControlEvent::terminate());
        });
        assert_eq!(sup.run(), Outcome::Clean);
    }

    #[test]
    fn test_launch_returning_worker_is_fatal() {
        let sup = Supervisor::new(Config::default(), WorkerOnly).unwrap();
        assert_eq!(sup.run(), Outcome::Fatal);
    }
}
