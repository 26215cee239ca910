//! # Event queue feeding the run loop.
//!
//! [`EventQueue`] is a thin wrapper around an unbounded [`tokio::sync::mpsc`]
//! sender. Many producers (signal routes, timers, watchdog, external
//! [`ControlHandle`](crate::ControlHandle)s) push; exactly one consumer, the
//! loop owner, pops.
//!
//! ## Architecture
//! ```text
//! Producers (many):                   Consumer (one):
//!   SIGHUP route ──┐
//!   SIGTERM route ─┼──────► EventQueue ──────► RunLoop::next_event()
//!   SIGCHLD route ─┤        (mpsc chan)            (controller thread)
//!   timers ────────┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks and is safe from any thread.
//! - **Unbounded**: control events are rare; none is dropped while the loop exists.
//! - **Loop-scoped**: once the loop is destroyed, publishing is a silent no-op.

use tokio::sync::mpsc;

use super::event::ControlEvent;

/// Sending side of a run loop's control queue.
///
/// ### Properties
/// - **Non-blocking**: `publish()` returns immediately.
/// - **Cloneable**: cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<ControlEvent>,
}

impl EventQueue {
    /// Creates a new queue and returns its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ControlEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Pushes an event for the loop owner.
    ///
    /// Returns `false` if the loop has already been destroyed.
    pub fn publish(&self, ev: ControlEvent) -> bool {
        self.tx.send(ev).is_ok()
    }

    /// True once the receiving loop is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
