//! # Supervisor state, reload epochs and process-wide flags.
//!
//! ```text
//! Starting ──start ok──► Running ──Reload──► Reloading ──rebuilt──► Running
//!                          │  ▲
//!              worker died │  │ relaunched            (parent only)
//!                          ▼  │
//!                       Respawning
//!
//! Starting / Running / Reloading / Respawning ──Terminate or fatal──► Stopping ──► Stopped
//! ```
//!
//! [`SupervisorState`] is a plain field of the one long-lived controller object of a
//! process; it is never touched from a signal route. [`ReloadEpoch`] numbers the
//! worker's runtime-state generations. The reloading flag and the process [`Role`]
//! are the only process-wide values: other components read them to suppress
//! reload-unsafe behavior and to tag log records.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// State of one managed worker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Initial allocation and configuration in progress.
    Starting,
    /// Run loop is serving events.
    Running,
    /// Worker runtime state is being rebuilt in place.
    Reloading,
    /// Worker died; a relaunch is scheduled (parent only).
    Respawning,
    /// Teardown in progress; deaths are expected and never respawned.
    Stopping,
    /// Terminal.
    Stopped,
}

impl SupervisorState {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorState::Starting => "starting",
            SupervisorState::Running => "running",
            SupervisorState::Reloading => "reloading",
            SupervisorState::Respawning => "respawning",
            SupervisorState::Stopping => "stopping",
            SupervisorState::Stopped => "stopped",
        }
    }

    /// True once teardown has begun.
    #[inline]
    pub fn is_stopping(&self) -> bool {
        matches!(self, SupervisorState::Stopping | SupervisorState::Stopped)
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Generation number of the worker's reloadable runtime state.
///
/// `ZERO` means no generation was ever built. Epochs only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ReloadEpoch(u64);

impl ReloadEpoch {
    /// No generation built yet.
    pub const ZERO: ReloadEpoch = ReloadEpoch(0);

    /// Returns the following generation.
    #[inline]
    pub fn next(self) -> ReloadEpoch {
        ReloadEpoch(self.0.saturating_add(1))
    }

    /// Raw generation number.
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReloadEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the process split this process is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Parent control process.
    Supervisor,
    /// The single supervised worker.
    Worker,
}

impl Role {
    /// Returns a short stable label used in log identifiers.
    pub fn as_label(&self) -> &'static str {
        match self {
            Role::Supervisor => "supervisor",
            Role::Worker => "worker",
        }
    }
}

static ROLE: AtomicU8 = AtomicU8::new(0);
static RELOADING: AtomicBool = AtomicBool::new(false);

/// Tags the current process with its role.
pub fn set_role(role: Role) {
    let raw = match role {
        Role::Supervisor => 0,
        Role::Worker => 1,
    };
    ROLE.store(raw, Ordering::SeqCst);
}

/// Role of the current process (`Supervisor` until tagged otherwise).
pub fn role() -> Role {
    match ROLE.load(Ordering::SeqCst) {
        1 => Role::Worker,
        _ => Role::Supervisor,
    }
}

/// True while a reload is rebuilding the runtime state of this process.
pub fn is_reloading() -> bool {
    RELOADING.load(Ordering::SeqCst)
}

/// Clears a reloading flag left behind by an interrupted reload.
pub(crate) fn clear_reloading() {
    RELOADING.store(false, Ordering::SeqCst);
}

/// Holds the process-wide reloading flag; cleared on drop.
///
/// Dropping on every exit path of a reload (including a fatal one) means the
/// flag can never outlive the reload that set it.
#[must_use = "the reloading flag is cleared when the guard is dropped"]
pub(crate) struct ReloadingGuard(());

impl ReloadingGuard {
    pub(crate) fn set() -> Self {
        RELOADING.store(true, Ordering::SeqCst);
        ReloadingGuard(())
    }
}

impl Drop for ReloadingGuard {
    fn drop(&mut self) {
        clear_reloading();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_is_monotonic() {
        let e0 = ReloadEpoch::ZERO;
        let e1 = e0.next();
        let e2 = e1.next();
        assert!(e0 < e1 && e1 < e2);
        assert_eq!(e2.get(), 2);
    }

    #[test]
    fn test_epoch_saturates() {
        let top = ReloadEpoch(u64::MAX);
        assert_eq!(top.next(), top);
    }

    #[test]
    fn test_stopping_states() {
        assert!(SupervisorState::Stopping.is_stopping());
        assert!(SupervisorState::Stopped.is_stopping());
        assert!(!SupervisorState::Reloading.is_stopping());
        assert_eq!(SupervisorState::Respawning.to_string(), "respawning");
    }
}
