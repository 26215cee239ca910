//! Worker respawn policy.
//!
//! ## Contents
//! - [`RespawnPolicy`] whether a dead worker is relaunched, and after which delay
//!
//! ## Quick wiring
//! ```text
//! Config { respawn: RespawnPolicy, .. }
//!      └─► core::watchdog::WorkerWatchdog uses:
//!           - enabled to choose between relaunch and supervisor termination
//!           - delay to schedule the relaunch on the run loop
//! ```

mod respawn;

pub use respawn::RespawnPolicy;
