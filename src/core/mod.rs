//! Runtime core: process split, supervision and worker lifecycle.
//!
//! Internal modules:
//! - [`launcher`]: splits into supervisor and worker, translates exit statuses;
//! - [`runloop`]: single-threaded run loop with its control queue;
//! - [`signals`]: OS signal routes and the watched-children table;
//! - [`watchdog`]: parent-side worker watcher applying the respawn policy;
//! - [`supervisor`]: parent-side driver;
//! - [`identity`]: pidfile claim, log channel, priority, cwd and umask;
//! - [`lifecycle`]: worker start, reload and stop sequences;
//! - [`control`]: in-process reload/terminate requests;
//! - [`state`]: supervisor state, reload epochs, role and reloading flag;
//! - [`shutdown`]: process outcomes and the exit routine.

mod control;
mod identity;
mod launcher;
mod lifecycle;
mod runloop;
mod shutdown;
mod signals;
mod state;
mod supervisor;
mod watchdog;

pub use control::ControlHandle;
pub use identity::{IdentityGuard, IdentityToken};
pub use launcher::{
    ExitKind, Launch, Launched, ProcessLauncher, WorkerHandle, WorkerView, ROLE_ENV, WORKER_ROLE,
};
pub use lifecycle::LifecycleController;
pub use runloop::RunLoop;
pub use shutdown::{close_std_fds, exit, Outcome};
pub use signals::{ChildTable, RouteKind, SignalRouter, SignalRoutes};
pub use state::{is_reloading, role, set_role, ReloadEpoch, Role, SupervisorState};
pub use supervisor::Supervisor;
pub use watchdog::{WatchAction, WorkerWatchdog};
