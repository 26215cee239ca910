//! # ControlHandle: in-process reload and terminate requests.
//!
//! The handle follows the worker across run-loop rebuilds: the controller
//! points it at each new loop's queue. A request made while no loop exists (in
//! the middle of a reload) is dropped and reported as `false`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::events::{ControlEvent, EventQueue};

/// Cloneable requester for the worker's control events.
#[derive(Clone, Default, Debug)]
pub struct ControlHandle {
    queue: Arc<Mutex<Option<EventQueue>>>,
    routing: Arc<AtomicBool>,
}

impl ControlHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<EventQueue>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn attach(&self, queue: EventQueue) {
        *self.lock() = Some(queue);
    }

    pub(crate) fn detach(&self) {
        self.lock().take();
    }

    pub(crate) fn set_routing(&self, enabled: bool) {
        self.routing.store(enabled, Ordering::SeqCst);
    }

    /// True while operator signal routes are installed.
    pub fn routing_enabled(&self) -> bool {
        self.routing.load(Ordering::SeqCst)
    }

    /// Queues a reload. Returns `false` if no loop is accepting events.
    pub fn request_reload(&self) -> bool {
        self.publish(ControlEvent::reload())
    }

    /// Queues a terminate. Returns `false` if no loop is accepting events.
    pub fn request_terminate(&self) -> bool {
        self.publish(ControlEvent::terminate())
    }

    fn publish(&self, ev: ControlEvent) -> bool {
        self.lock().as_ref().is_some_and(|q| q.publish(ev))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_follow_attached_queue() {
        let handle = ControlHandle::new();
        assert!(!handle.request_reload());

        let (queue, mut rx) = EventQueue::channel();
        handle.attach(queue);
        assert!(handle.request_terminate());
        assert!(rx.try_recv().unwrap().is_terminate());

        handle.detach();
        assert!(!handle.request_reload());
    }
}
