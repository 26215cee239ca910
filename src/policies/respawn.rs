//! # Respawn policy for the supervised worker.
//!
//! [`RespawnPolicy`] decides what the supervisor does when its worker dies
//! unexpectedly.
//!
//! - `enabled = true`: a new worker is launched after `delay`.
//! - `enabled = false`: the supervisor terminates itself with a non-zero status,
//!   so the failure propagates to whatever started the supervisor instead of
//!   being masked by a fresh worker.
//!
//! ```text
//! worker died ──► enabled? ──yes──► wait delay ──► launch()
//!                    │
//!                    └──no───► Terminate (Outcome::WorkerLost)
//! ```
//!
//! A death observed while the supervisor is already stopping never respawns.

use std::time::Duration;

/// Policy controlling whether a dead worker is relaunched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RespawnPolicy {
    /// Relaunch the worker after an unexpected death.
    pub enabled: bool,
    /// Fixed wait between the observed death and the relaunch.
    pub delay: Duration,
}

impl RespawnPolicy {
    /// Policy that never respawns.
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            delay: Duration::ZERO,
        }
    }

    /// Policy that respawns after `delay`.
    pub const fn after(delay: Duration) -> Self {
        Self {
            enabled: true,
            delay,
        }
    }
}

impl Default for RespawnPolicy {
    /// Respawn enabled with a 1s delay.
    fn default() -> Self {
        Self::after(Duration::from_secs(1))
    }
}
