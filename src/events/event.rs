//! # Control events queued on the run loop.
//!
//! The [`EventKind`] enum classifies everything that can drive a state
//! transition:
//! - **Operator requests**: reload and terminate (from signals or a [`ControlHandle`](crate::ControlHandle))
//! - **Child notifications**: worker death or the periodic watchdog tick
//! - **Timers**: a due respawn, an expired stop grace period
//!
//! [`ControlEvent`] is an immutable value: signal routes and timers build one and
//! push it onto the [`EventQueue`](super::EventQueue); only the loop owner acts on it.
//!
//! ## Ordering guarantees
//! Each event has a process-wide sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use nix::unistd::Pid;
//! use procvisor::{ControlEvent, EventKind, ExitKind};
//!
//! let ev = ControlEvent::child(Pid::from_raw(4242), ExitKind::Exited(1));
//!
//! assert_eq!(ev.kind, EventKind::Child);
//! assert_eq!(ev.pid, Some(Pid::from_raw(4242)));
//! assert_eq!(ev.exit, Some(ExitKind::Exited(1)));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use nix::unistd::Pid;

use crate::core::ExitKind;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of control events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Reload requested (SIGHUP or explicit request).
    ///
    /// Sets:
    /// - `at`: wall-clock timestamp
    /// - `seq`: global sequence
    Reload,

    /// Terminate requested (SIGINT, SIGTERM, explicit request, or a worker
    /// lost with respawn disabled).
    ///
    /// Sets:
    /// - `at`: wall-clock timestamp
    /// - `seq`: global sequence
    Terminate,

    /// Watched child changed state: genuine exit or watchdog tick.
    ///
    /// Sets:
    /// - `pid`: child pid
    /// - `exit`: [`ExitKind`], `Tick` for the periodic no-death timeout
    /// - `at`: wall-clock timestamp
    /// - `seq`: global sequence
    Child,

    /// Respawn delay elapsed; the supervisor should launch a new worker.
    ///
    /// Sets:
    /// - `pid`: pid of the worker being replaced
    /// - `at`: wall-clock timestamp
    /// - `seq`: global sequence
    Respawn,

    /// Stop grace period elapsed while the worker was still alive.
    ///
    /// Sets:
    /// - `pid`: pid of the worker still alive
    /// - `at`: wall-clock timestamp
    /// - `seq`: global sequence
    GraceExpired,
}

impl EventKind {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::Reload => "reload",
            EventKind::Terminate => "terminate",
            EventKind::Child => "child",
            EventKind::Respawn => "respawn",
            EventKind::GraceExpired => "grace_expired",
        }
    }
}

/// Control event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlEvent {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Process the event refers to, if applicable.
    pub pid: Option<Pid>,
    /// Exit classification (only for [`EventKind::Child`]).
    pub exit: Option<ExitKind>,
}

impl ControlEvent {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            pid: None,
            exit: None,
        }
    }

    /// Attaches a process id.
    #[inline]
    pub fn with_pid(mut self, pid: Pid) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches an exit classification.
    #[inline]
    pub fn with_exit(mut self, exit: ExitKind) -> Self {
        self.exit = Some(exit);
        self
    }

    /// Creates a reload request.
    #[inline]
    pub fn reload() -> Self {
        Self::new(EventKind::Reload)
    }

    /// Creates a terminate request.
    #[inline]
    pub fn terminate() -> Self {
        Self::new(EventKind::Terminate)
    }

    /// Creates a child notification.
    #[inline]
    pub fn child(pid: Pid, exit: ExitKind) -> Self {
        Self::new(EventKind::Child).with_pid(pid).with_exit(exit)
    }

    /// Creates a watchdog tick for `pid`.
    #[inline]
    pub fn tick(pid: Pid) -> Self {
        Self::child(pid, ExitKind::Tick)
    }

    #[inline]
    pub fn is_terminate(&self) -> bool {
        matches!(self.kind, EventKind::Terminate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let a = ControlEvent::reload();
        let b = ControlEvent::terminate();
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_tick_is_child_event() {
        let ev = ControlEvent::tick(Pid::from_raw(7));
        assert_eq!(ev.kind, EventKind::Child);
        assert_eq!(ev.exit, Some(ExitKind::Tick));
        assert!(!ev.is_terminate());
    }
}
