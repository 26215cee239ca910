//! # ProcessLauncher: split into supervisor and worker control flow.
//!
//! [`Launch::launch`] returns a tagged [`Launched`] value consumed at a single
//! call site: the supervisor keeps the [`WorkerHandle`], the worker continues
//! with a [`WorkerView`].
//!
//! The split re-executes the current binary with a role marker in its
//! environment. The marker is consumed by the first `launch()` of the new
//! process, which therefore takes the worker path; every other call spawns.
//!
//! ```text
//! supervisor process                          worker process (same binary)
//! ──────────────────                          ────────────────────────────
//! launch() ──spawn(env PROCVISOR_ROLE=worker)──► main()
//!   │          pre-exec: PDEATHSIG=SIGTERM          └─► launch()
//!   │                    unblock signal mask              ├─ consume marker
//!   │                    SIGCHLD → default                ├─ re-arm PDEATHSIG
//!   ▼                                                     ├─ tag Role::Worker
//! Parent(WorkerHandle)                                    ▼
//!   └─► WorkerWatchdog::register()                   Worker(WorkerView)
//! ```
//!
//! Exit statuses reported by `waitpid` are translated into [`ExitKind`] here.

use std::ffi::OsString;
use std::fmt;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;
use std::time::SystemTime;

use nix::sys::signal::{self, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::wait::WaitStatus;
use nix::unistd::{self, Pid};
use tracing::{info, warn};

use crate::core::state::{self, Role};
use crate::error::LaunchError;
use crate::logging::LogSink;

/// Environment variable carrying the process role across the split.
pub const ROLE_ENV: &str = "PROCVISOR_ROLE";
/// Value of [`ROLE_ENV`] for the worker.
pub const WORKER_ROLE: &str = "worker";

/// How a watched child changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Periodic watchdog timeout: the child is still alive.
    Tick,
    /// Child exited with a status code.
    Exited(i32),
    /// Child was killed by a signal.
    Signaled(i32),
    /// Child is gone but its status could not be collected.
    Unknown,
}

impl ExitKind {
    /// Translates a `waitpid` result; `None` while the child is still running.
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(ExitKind::Exited(code)),
            WaitStatus::Signaled(_, sig, _) => Some(ExitKind::Signaled(sig as i32)),
            _ => None,
        }
    }

    /// True for the no-death watchdog timeout.
    #[inline]
    pub fn is_tick(&self) -> bool {
        matches!(self, ExitKind::Tick)
    }
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitKind::Tick => f.write_str("watchdog tick"),
            ExitKind::Exited(code) => write!(f, "exited with status {code}"),
            ExitKind::Signaled(sig) => write!(f, "killed by signal {sig}"),
            ExitKind::Unknown => f.write_str("exit status unknown"),
        }
    }
}

/// Supervisor-side handle of a launched worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    pid: Pid,
    spawned_at: SystemTime,
    launch: u64,
}

impl WorkerHandle {
    /// Creates a handle for `pid`, stamped now.
    pub fn new(pid: Pid, launch: u64) -> Self {
        Self {
            pid,
            spawned_at: SystemTime::now(),
            launch,
        }
    }

    /// Worker process id.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Wall-clock time of the spawn.
    pub fn spawned_at(&self) -> SystemTime {
        self.spawned_at
    }

    /// 1-based launch counter of the supervisor that created this handle.
    pub fn launch(&self) -> u64 {
        self.launch
    }
}

/// Worker-side view after the split.
#[derive(Debug, Clone)]
pub struct WorkerView {
    /// Supervisor pid as seen right after the split.
    pub parent: Pid,
    /// When the worker took over.
    pub started_at: SystemTime,
}

impl WorkerView {
    /// True when the supervisor vanished before parent-death delivery was armed.
    pub fn is_orphaned(&self) -> bool {
        self.parent == Pid::from_raw(1)
    }
}

/// Result of a process split.
#[derive(Debug)]
pub enum Launched {
    /// Running in the supervisor; a worker was started.
    Parent(WorkerHandle),
    /// Running in the worker.
    Worker(WorkerView),
}

/// Process split primitive.
pub trait Launch {
    /// Splits execution; see [`Launched`].
    fn launch(&mut self) -> Result<Launched, LaunchError>;
}

/// [`Launch`] implementation re-executing the current binary.
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
    worker_pending: bool,
    launches: u64,
    log: Option<LogSink>,
}

impl ProcessLauncher {
    /// Launcher for the running executable with its original arguments.
    ///
    /// If this process was itself started as a worker, the first
    /// [`launch`](Launch::launch) takes the worker path.
    pub fn from_env() -> Result<Self, LaunchError> {
        let program =
            std::env::current_exe().map_err(|source| LaunchError::CurrentExe { source })?;
        let args = std::env::args_os().skip(1).collect();
        let worker_pending = std::env::var_os(ROLE_ENV).is_some_and(|v| v == WORKER_ROLE);

        Ok(Self {
            program,
            args,
            worker_pending,
            launches: 0,
            log: None,
        })
    }

    /// Launcher for an explicit program; always takes the supervisor path.
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
            worker_pending: false,
            launches: 0,
            log: None,
        }
    }

    /// Flushes this log channel before every spawn.
    pub fn with_log_sink(mut self, sink: LogSink) -> Self {
        self.log = Some(sink);
        self
    }

    /// True when the next launch takes the worker path.
    pub fn is_worker(&self) -> bool {
        self.worker_pending
    }

    fn spawn_worker(&mut self) -> Result<WorkerHandle, LaunchError> {
        if let Some(log) = &self.log {
            log.flush();
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).env(ROLE_ENV, WORKER_ROLE);
        // SAFETY: the hook runs between fork and exec and only issues
        // async-signal-safe syscalls (prctl, sigprocmask, sigaction).
        unsafe {
            cmd.pre_exec(prepare_exec);
        }

        let child = cmd.spawn().map_err(|source| LaunchError::Spawn { source })?;
        let pid = Pid::from_raw(child.id() as i32);
        // Reaped through the SIGCHLD route, never through `Child::wait`.
        drop(child);

        self.launches += 1;
        info!(pid = %pid, launch = self.launches, "Starting worker process, pid={pid}");
        Ok(WorkerHandle::new(pid, self.launches))
    }
}

impl Launch for ProcessLauncher {
    fn launch(&mut self) -> Result<Launched, LaunchError> {
        if self.worker_pending {
            self.worker_pending = false;
            return Ok(Launched::Worker(enter_worker()));
        }
        self.spawn_worker().map(Launched::Parent)
    }
}

/// Runs in the forked child right before exec.
fn prepare_exec() -> std::io::Result<()> {
    #[cfg(target_os = "linux")]
    nix::sys::prctl::set_pdeathsig(Signal::SIGTERM)?;

    signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None)?;
    // SAFETY: restoring the default disposition installs no handler code.
    unsafe { signal::signal(Signal::SIGCHLD, SigHandler::SigDfl) }?;
    Ok(())
}

/// Worker-side half of the split, in order: parent-death delivery, cleared
/// child discovery, role tag.
fn enter_worker() -> WorkerView {
    // The marker must not leak into processes the worker starts itself.
    std::env::remove_var(ROLE_ENV);

    #[cfg(target_os = "linux")]
    if let Err(e) = nix::sys::prctl::set_pdeathsig(Signal::SIGTERM) {
        warn!(error = %e, "cannot arm parent-death signal");
    }

    // SAFETY: restoring the default disposition installs no handler code.
    if let Err(e) = unsafe { signal::signal(Signal::SIGCHLD, SigHandler::SigDfl) } {
        warn!(error = %e, "cannot reset SIGCHLD disposition");
    }

    state::set_role(Role::Worker);
    let view = WorkerView {
        parent: unistd::getppid(),
        started_at: SystemTime::now(),
    };
    if view.is_orphaned() {
        warn!("supervisor exited before the worker started");
    }
    view
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_kind_from_wait_status() {
        let pid = Pid::from_raw(10);
        assert_eq!(
            ExitKind::from_wait_status(WaitStatus::Exited(pid, 3)),
            Some(ExitKind::Exited(3))
        );
        assert_eq!(
            ExitKind::from_wait_status(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            Some(ExitKind::Signaled(9))
        );
        assert_eq!(ExitKind::from_wait_status(WaitStatus::StillAlive), None);
    }

    #[test]
    fn test_exit_kind_display() {
        assert_eq!(ExitKind::Exited(1).to_string(), "exited with status 1");
        assert_eq!(ExitKind::Tick.to_string(), "watchdog tick");
        assert!(ExitKind::Tick.is_tick());
        assert!(!ExitKind::Signaled(15).is_tick());
    }

    #[test]
    fn test_explicit_launcher_spawns_and_counts() {
        let mut launcher = ProcessLauncher::new("/bin/sh", vec!["-c".into(), "exit 0".into()]);
        assert!(!launcher.is_worker());

        let first = match launcher.launch().unwrap() {
            Launched::Parent(h) => h,
            Launched::Worker(_) => panic!("explicit launcher must stay in the supervisor"),
        };
        let second = match launcher.launch().unwrap() {
            Launched::Parent(h) => h,
            Launched::Worker(_) => panic!("explicit launcher must stay in the supervisor"),
        };
        assert_eq!(first.launch(), 1);
        assert_eq!(second.launch(), 2);
        assert_ne!(first.pid(), second.pid());

        for pid in [first.pid(), second.pid()] {
            let _ = nix::sys::wait::waitpid(pid, None);
        }
    }

    #[test]
    fn test_spawn_failure_is_launch_error() {
        let mut launcher = ProcessLauncher::new("/nonexistent/procvisor-test-binary", Vec::new());
        let err = launcher.launch().unwrap_err();
        assert_eq!(err.as_label(), "launch_spawn");
    }
}
