//! # SignalRouter: OS signals to queued control events.
//!
//! Signal listeners never act: they build an immutable [`ControlEvent`], push it
//! onto the [`RunLoop`]'s queue and go back to waiting. The loop owner performs
//! every transition.
//!
//! ```text
//! SIGHUP ─────────────► Reload
//! SIGINT, SIGTERM ────► Terminate                       ──► EventQueue ──► owner
//! SIGCHLD ──► reap watched pids (WNOHANG) ──► Child(pid, exit) ─┘
//! SIGPIPE ────────────► SIG_IGN (never routed)
//! ```
//!
//! ## Rules
//! - Routes are bound to one run loop; a rebuilt loop needs fresh routes.
//! - Operator routes (HUP/INT/TERM) and child routes are **separate handles**, so a
//!   reload can re-arm child discovery first and operator requests last.
//! - Only pids registered in the [`ChildTable`] are reaped; exit statuses of other
//!   children of the process are left alone.
//! - Installing child routes performs one reap sweep, so a death that happened while
//!   no route existed is still reported.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nix::errno::Errno;
use nix::sys::signal::{self as nix_signal, SigHandler, Signal as NixSignal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tokio::select;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::launcher::ExitKind;
use crate::core::runloop::RunLoop;
use crate::events::{ControlEvent, EventKind, EventQueue};

/// Set of child pids whose exit is routed as [`EventKind::Child`].
///
/// Cloning shares the set.
#[derive(Clone, Debug, Default)]
pub struct ChildTable {
    inner: Arc<Mutex<HashSet<Pid>>>,
}

impl ChildTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<Pid>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts watching `pid`.
    pub fn watch(&self, pid: Pid) {
        self.lock().insert(pid);
    }

    /// Stops watching `pid` without reaping it.
    pub fn forget(&self, pid: Pid) {
        self.lock().remove(&pid);
    }

    /// True if `pid` is watched.
    pub fn contains(&self, pid: Pid) -> bool {
        self.lock().contains(&pid)
    }

    /// Number of watched pids.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if nothing is watched.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Collects exit statuses of watched children without blocking.
    ///
    /// Reaped pids leave the table. A pid the kernel no longer knows as our
    /// child is reported as [`ExitKind::Unknown`].
    pub fn reap(&self) -> Vec<(Pid, ExitKind)> {
        let mut watched = self.lock();
        let mut gone = Vec::new();

        for &pid in watched.iter() {
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(status) => {
                    if let Some(exit) = ExitKind::from_wait_status(status) {
                        gone.push((pid, exit));
                    }
                }
                Err(Errno::ECHILD) => gone.push((pid, ExitKind::Unknown)),
                Err(Errno::EINTR) => {}
                Err(e) => warn!(pid = %pid, error = %e, "waitpid failed"),
            }
        }
        for (pid, _) in &gone {
            watched.remove(pid);
        }
        gone
    }
}

/// Which signals a [`SignalRoutes`] handle covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// SIGHUP, SIGINT, SIGTERM.
    Operator,
    /// SIGCHLD.
    Children,
}

impl RouteKind {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RouteKind::Operator => "operator",
            RouteKind::Children => "children",
        }
    }
}

/// Installed routes on one run loop. Dropping the handle disables them.
#[derive(Debug)]
pub struct SignalRoutes {
    kind: RouteKind,
    token: CancellationToken,
}

impl SignalRoutes {
    /// Signals covered by this handle.
    pub fn kind(&self) -> RouteKind {
        self.kind
    }

    /// True until disabled (or until the loop is destroyed).
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Removes the routes; signals arriving afterwards produce no event.
    pub fn disable(self) {
        debug!(routes = self.kind.as_label(), "signal routes disabled");
    }
}

impl Drop for SignalRoutes {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Installs signal routes on run loops.
pub struct SignalRouter;

impl SignalRouter {
    /// Routes SIGHUP to `Reload` and SIGINT/SIGTERM to `Terminate`.
    pub fn operator(rl: &RunLoop) -> std::io::Result<SignalRoutes> {
        let token = rl.token().child_token();
        let _rt = rl.enter();

        let routes = [
            (signal(SignalKind::hangup())?, "SIGHUP", EventKind::Reload),
            (signal(SignalKind::interrupt())?, "SIGINT", EventKind::Terminate),
            (signal(SignalKind::terminate())?, "SIGTERM", EventKind::Terminate),
        ];
        for (sig, name, kind) in routes {
            rl.spawn(name, forward(sig, name, kind, rl.queue(), token.clone()));
        }

        debug!(run_loop = rl.id(), "operator signal routes installed");
        Ok(SignalRoutes {
            kind: RouteKind::Operator,
            token,
        })
    }

    /// Routes SIGCHLD to one `Child` event per reaped watched pid.
    pub fn children(rl: &RunLoop, table: &ChildTable) -> std::io::Result<SignalRoutes> {
        let token = rl.token().child_token();
        let sig = {
            let _rt = rl.enter();
            signal(SignalKind::child())?
        };
        rl.spawn(
            "SIGCHLD",
            reap_on_signal(sig, table.clone(), rl.queue(), token.clone()),
        );
        Self::sweep(table, &rl.queue());

        debug!(run_loop = rl.id(), watched = table.len(), "child signal routes installed");
        Ok(SignalRoutes {
            kind: RouteKind::Children,
            token,
        })
    }

    /// Reaps watched children now and queues their events.
    ///
    /// Returns how many deaths were queued.
    pub fn sweep(table: &ChildTable, queue: &EventQueue) -> usize {
        let gone = table.reap();
        let n = gone.len();
        for (pid, exit) in gone {
            debug!(pid = %pid, exit = %exit, "child reaped");
            queue.publish(ControlEvent::child(pid, exit));
        }
        n
    }

    /// Sets SIGPIPE to be ignored for the whole process.
    pub fn ignore_broken_pipe() -> nix::Result<()> {
        // SAFETY: SIG_IGN installs no handler code.
        unsafe { nix_signal::signal(NixSignal::SIGPIPE, SigHandler::SigIgn) }.map(|_| ())
    }
}

async fn forward(
    mut sig: Signal,
    name: &'static str,
    kind: EventKind,
    queue: EventQueue,
    token: CancellationToken,
) {
    loop {
        select! {
            biased;
            _ = token.cancelled() => break,
            got = sig.recv() => {
                if got.is_none() {
                    break;
                }
                debug!(signal = name, event = kind.as_label(), "signal routed");
                if !queue.publish(ControlEvent::new(kind)) {
                    break;
                }
            }
        }
    }
}

async fn reap_on_signal(
    mut sig: Signal,
    table: ChildTable,
    queue: EventQueue,
    token: CancellationToken,
) {
    loop {
        select! {
            biased;
            _ = token.cancelled() => break,
            got = sig.recv() => {
                if got.is_none() || queue.is_closed() {
                    break;
                }
                SignalRouter::sweep(&table, &queue);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::Duration;

    fn spawn_exit(code: i32) -> Pid {
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(format!("exit {code}"))
            .spawn()
            .unwrap();
        Pid::from_raw(child.id() as i32)
    }

    #[test]
    fn test_table_reaps_only_watched() {
        let table = ChildTable::new();
        let watched = spawn_exit(4);
        let other = spawn_exit(5);
        table.watch(watched);

        let mut reaped = Vec::new();
        for _ in 0..200 {
            reaped.extend(table.reap());
            if !reaped.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(reaped, vec![(watched, ExitKind::Exited(4))]);
        assert!(table.is_empty());

        // Still a zombie: nobody else collected it.
        assert_eq!(waitpid(other, None).unwrap(), WaitStatus::Exited(other, 5));
    }

    #[test]
    fn test_unknown_child_is_reported() {
        let table = ChildTable::new();
        let stranger = Pid::from_raw(i32::MAX - 7);
        table.watch(stranger);
        assert_eq!(table.reap(), vec![(stranger, ExitKind::Unknown)]);
        assert!(!table.contains(stranger));
    }

    #[test]
    fn test_child_routes_sweep_on_install() {
        let mut rl = RunLoop::create().unwrap();
        let table = ChildTable::new();
        let pid = spawn_exit(0);
        table.watch(pid);
        std::thread::sleep(Duration::from_millis(100));

        let routes = SignalRouter::children(&rl, &table).unwrap();
        assert!(routes.is_active());
        assert_eq!(routes.kind(), RouteKind::Children);

        let ev = rl.next_event_within(Duration::from_secs(2)).unwrap();
        assert_eq!(ev.kind, EventKind::Child);
        assert_eq!(ev.pid, Some(pid));
        assert_eq!(ev.exit, Some(ExitKind::Exited(0)));
        routes.disable();
    }

    #[test]
    fn test_routes_inactive_after_loop_destroyed() {
        let rl = RunLoop::create().unwrap();
        let routes = SignalRouter::children(&rl, &ChildTable::new()).unwrap();
        let _ = rl.destroy();
        assert!(!routes.is_active());
    }
}
