//! Control events: types and queue.
//!
//! This module groups the event **data model** and the **queue** used to
//! hand operator requests, child notifications and timers to the single
//! thread that owns a run loop.
//!
//! ## Contents
//! - [`EventKind`], [`ControlEvent`] event classification and payload
//! - [`EventQueue`] thin wrapper over `tokio::sync::mpsc`
//!
//! ## Quick reference
//! - **Publishers**: signal routes, `RunLoop::schedule_event` timers,
//!   `WorkerWatchdog`, `ControlHandle`.
//! - **Consumer**: `RunLoop::next_event()`, called by `Supervisor` (parent)
//!   or `LifecycleController` (worker).

mod event;
mod queue;

pub use event::{ControlEvent, EventKind};
pub use queue::EventQueue;
