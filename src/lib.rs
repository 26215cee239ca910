//! # procvisor
//!
//! **Procvisor** supervises exactly one long-lived worker process.
//!
//! The parent launches the worker, watches it, respawns it (or exits) when it
//! dies, and forwards operator signals. The worker claims its identity
//! (pidfile, log channel, priority, working directory, umask) and runs an
//! [`Engine`](engine::Engine) inside a run loop that it rebuilds in place on
//! reload.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!               main()
//!                 │
//!          ProcessLauncher::launch()
//!          ┌──────┴──────────────────────────┐
//!          ▼                                 ▼
//!   Parent(WorkerHandle)               Worker(WorkerView)
//!          │                                 │
//! ┌────────▼─────────────────┐   ┌───────────▼──────────────────────┐
//! │ Supervisor               │   │ LifecycleController              │
//! │ - RunLoop + EventQueue   │   │ - IdentityGuard (pidfile, log)   │
//! │ - WorkerWatchdog         │   │ - RunLoop (rebuilt on reload)    │
//! │ - SignalRouter routes    │   │ - RuntimeState generations       │
//! └────────┬─────────────────┘   │ - SignalRouter routes            │
//!          │                     └───────────┬──────────────────────┘
//!          │ SIGHUP / SIGTERM / SIGKILL      │
//!          └────────────────────────────────►│
//!          ◄──────── SIGCHLD (worker exit) ──┘
//!
//!   both return Outcome ──► shutdown::exit() (fds 0-2 → /dev/null, exit code)
//! ```
//!
//! ### Events
//! ```text
//! SIGHUP ─► Reload     SIGINT/SIGTERM ─► Terminate     SIGCHLD ─► Child(pid, exit)
//! timers ─► Child(pid, Tick), Respawn, GraceExpired
//! ```
//!
//! ## Features
//! | Area              | Description                                       | Key types                                   |
//! |-------------------|---------------------------------------------------|---------------------------------------------|
//! | **Process split** | Re-exec based supervisor/worker split             | [`ProcessLauncher`], [`Launched`]           |
//! | **Supervision**   | Death detection, respawn policy, controlled stop  | [`Supervisor`], [`WorkerWatchdog`]          |
//! | **Worker**        | Start, in-place reload, stop                      | [`LifecycleController`], [`ControlHandle`]  |
//! | **Identity**      | Pidfile, log channel, priority, cwd, umask        | [`IdentityGuard`], [`FsPidfile`]            |
//! | **Errors**        | Typed errors with stable labels                   | [`LaunchError`], [`StartupError`]           |
//! | **Configuration** | Shared settings for both roles                    | [`Config`], [`RespawnPolicy`]               |
//!
//! ## Example
//! ```no_run
//! use procvisor::engine::{IdleEngine, TomlConfigParser};
//! use procvisor::logging::LogSink;
//! use procvisor::{
//!     Config, FsPidfile, IdentityGuard, Launch, Launched, LifecycleController, ProcessLauncher,
//!     Supervisor,
//! };
//!
//! fn main() {
//!     let cfg = Config::default();
//!     let sink = LogSink::new();
//!     let mut launcher = ProcessLauncher::from_env().unwrap();
//!
//!     let outcome = match launcher.launch().unwrap() {
//!         Launched::Parent(first) => Supervisor::new(cfg, launcher).unwrap().run_with(first),
//!         Launched::Worker(_) => {
//!             let identity = IdentityGuard::new(cfg.clone(), FsPidfile, sink);
//!             LifecycleController::new(cfg, IdleEngine, TomlConfigParser, identity).execute()
//!         }
//!     };
//!     procvisor::exit(outcome);
//! }
//! ```

mod config;
mod core;
mod error;
mod events;
mod policies;

pub mod engine;
pub mod logging;
pub mod pidfile;

// ---- Public re-exports ----

pub use config::Config;
pub use core::{
    close_std_fds, exit, is_reloading, role, set_role, ChildTable, ControlHandle, ExitKind,
    IdentityGuard, IdentityToken, Launch, Launched, LifecycleController, Outcome,
    ProcessLauncher, ReloadEpoch, Role, RouteKind, RunLoop, SignalRouter, SignalRoutes,
    Supervisor, SupervisorState, WatchAction, WorkerHandle, WorkerView, WorkerWatchdog, ROLE_ENV,
    WORKER_ROLE,
};
pub use error::{IdentityError, LaunchError, RuntimeError, StartupError};
pub use events::{ControlEvent, EventKind, EventQueue};
pub use pidfile::{FsPidfile, Pidfile};
pub use policies::RespawnPolicy;
