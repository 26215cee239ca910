//! # RunLoop: single-threaded cooperative event loop.
//!
//! A [`RunLoop`] is a tokio `current_thread` runtime plus the receiving end of an
//! [`EventQueue`]. Spawned work (signal routes, timers, the engine) only makes
//! progress while the owner waits in [`RunLoop::next_event`]; everything the owner
//! does with an event runs with loop-level mutual exclusion.
//!
//! ## Architecture
//! ```text
//!   owner thread                              runtime (current_thread)
//!   ───────────                              ────────────────────────
//!   loop {
//!     ev = run_loop.next_event() ──block_on──►  timers, signal routes, engine work
//!                                   ◄─────────  queue.publish(ev)
//!     handle(ev)        (runtime parked: no task runs during a transition)
//!   }
//!   run_loop.destroy() ──► cancel token ──► drop all tasks ──► pending events returned
//! ```
//!
//! ## Rules
//! - One owner: only the thread holding `&mut RunLoop` consumes events.
//! - Work is **isolated**: a panicking unit of work is caught and logged.
//! - Destroying the loop **cancels** its token; every timer and route bound to it
//!   stops, and events still queued are handed back to the caller.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::runtime::{EnterGuard, Runtime};
use tokio::sync::mpsc;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::events::{ControlEvent, EventQueue};

/// Upper bound for spawned work to wind down when a loop is destroyed.
const DESTROY_GRACE: Duration = Duration::from_millis(200);

static LOOP_IDS: AtomicU64 = AtomicU64::new(1);

/// Single-threaded run loop owning a control-event queue.
pub struct RunLoop {
    id: u64,
    rt: Runtime,
    queue: EventQueue,
    rx: mpsc::UnboundedReceiver<ControlEvent>,
    token: CancellationToken,
}

impl RunLoop {
    /// Creates a fresh loop with an empty queue.
    pub fn create() -> std::io::Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (queue, rx) = EventQueue::channel();
        let id = LOOP_IDS.fetch_add(1, Ordering::Relaxed);
        debug!(run_loop = id, "run loop created");

        Ok(Self {
            id,
            rt,
            queue,
            rx,
            token: CancellationToken::new(),
        })
    }

    /// Process-unique identifier of this loop (for logs).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns a sender for this loop's control queue.
    pub fn queue(&self) -> EventQueue {
        self.queue.clone()
    }

    /// Token cancelled when the loop is destroyed.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Enters the runtime context (needed to register OS signal listeners).
    pub fn enter(&self) -> EnterGuard<'_> {
        self.rt.enter()
    }

    /// Pushes `ev` onto the queue after `delay`.
    ///
    /// The timer dies with the loop: an event scheduled on a destroyed loop is
    /// never delivered.
    pub fn schedule_event(&self, ev: ControlEvent, delay: Duration) {
        let queue = self.queue.clone();
        let token = self.token.clone();

        self.rt.spawn(async move {
            if !delay.is_zero() {
                let sleep = time::sleep(delay);
                tokio::pin!(sleep);
                select! {
                    _ = &mut sleep => {}
                    _ = token.cancelled() => { return; }
                }
            }
            queue.publish(ev);
        });
    }

    /// Spawns a unit of work on the loop.
    ///
    /// Panics inside `work` are caught and logged with the given name.
    pub fn spawn<F>(&self, name: &'static str, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.rt.spawn(async move {
            if let Err(panic_err) = AssertUnwindSafe(work).catch_unwind().await {
                error!(work = name, panic = ?panic_err, "run loop work panicked");
            }
        });
    }

    /// Blocks until the next control event, running spawned work meanwhile.
    pub fn next_event(&mut self) -> Option<ControlEvent> {
        let rx = &mut self.rx;
        self.rt.block_on(rx.recv())
    }

    /// Like [`next_event`](Self::next_event) but gives up after `limit`.
    pub fn next_event_within(&mut self, limit: Duration) -> Option<ControlEvent> {
        let rx = &mut self.rx;
        self.rt
            .block_on(async { time::timeout(limit, rx.recv()).await.ok().flatten() })
    }

    /// Destroys the loop and returns the events that were still queued.
    ///
    /// Spawned work observes cancellation first and gets one scheduler pass to
    /// finish; whatever is still running afterwards is dropped.
    pub fn destroy(self) -> Vec<ControlEvent> {
        let RunLoop {
            id,
            rt,
            queue,
            mut rx,
            token,
        } = self;

        token.cancel();
        rt.block_on(tokio::task::yield_now());
        drop(queue);

        let mut pending = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            pending.push(ev);
        }
        rt.shutdown_timeout(DESTROY_GRACE);
        debug!(run_loop = id, pending = pending.len(), "run loop destroyed");
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[test]
    fn test_scheduled_event_is_delivered() {
        let mut rl = RunLoop::create().unwrap();
        rl.schedule_event(ControlEvent::reload(), Duration::from_millis(10));

        let ev = rl.next_event_within(Duration::from_secs(2)).unwrap();
        assert_eq!(ev.kind, EventKind::Reload);
    }

    #[test]
    fn test_scheduled_event_respects_delay() {
        let mut rl = RunLoop::create().unwrap();
        let start = std::time::Instant::now();
        rl.schedule_event(ControlEvent::terminate(), Duration::from_millis(100));

        let ev = rl.next_event_within(Duration::from_secs(2)).unwrap();
        assert!(ev.is_terminate());
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_destroy_returns_pending_and_cancels_timers() {
        let rl = RunLoop::create().unwrap();
        let token = rl.token();
        rl.queue().publish(ControlEvent::terminate());
        rl.schedule_event(ControlEvent::reload(), Duration::from_secs(60));

        let pending = rl.destroy();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].is_terminate());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_queue_closed_after_destroy() {
        let rl = RunLoop::create().unwrap();
        let queue = rl.queue();
        let _ = rl.destroy();
        assert!(queue.is_closed());
        assert!(!queue.publish(ControlEvent::reload()));
    }

    #[test]
    fn test_panicking_work_is_isolated() {
        let mut rl = RunLoop::create().unwrap();
        rl.spawn("boom", async { panic!("boom") });
        let queue = rl.queue();
        rl.spawn("after", async move {
            queue.publish(ControlEvent::terminate());
        });

        let ev = rl.next_event_within(Duration::from_secs(2)).unwrap();
        assert!(ev.is_terminate());
    }
}
