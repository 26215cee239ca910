//! # IdentityGuard: the worker's process identity.
//!
//! Claimed once, before any run loop exists:
//!
//! ```text
//! claim():
//!   1. ident    program[_netns][_instance]
//!   2. channel  syslog (LOG_PID [+ LOG_CONS]) and/or qualified log file
//!               (an unopenable file is logged and skipped)
//!   3. priority SCHED_RR at max priority (best effort)
//!   4. pidfile  current pid, refused if held by a live process ──► IdentityError
//!   5. cwd "/", umask 0
//!
//! release_token(): remove the pidfile if this guard wrote it
//! release():       release_token() + close the log channel
//! ```
//!
//! Both release calls are idempotent and safe after a partial claim.

use std::path::PathBuf;

use nix::sys::stat::{umask, Mode};
use nix::unistd::{self, Pid};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::state::{self, Role};
use crate::error::IdentityError;
use crate::logging::{ChannelSpec, LogSink};
use crate::pidfile::Pidfile;

/// Pidfile path plus the pid written to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityToken {
    /// Pidfile path.
    pub path: PathBuf,
    /// Pid recorded in the file.
    pub pid: Pid,
}

/// Owns the pidfile claim and the log channel of one process.
pub struct IdentityGuard<P: Pidfile> {
    cfg: Config,
    pidfile: P,
    sink: LogSink,
    token: Option<IdentityToken>,
}

impl<P: Pidfile> IdentityGuard<P> {
    /// Creates an unclaimed guard writing records to `sink`.
    pub fn new(cfg: Config, pidfile: P, sink: LogSink) -> Self {
        Self {
            cfg,
            pidfile,
            sink,
            token: None,
        }
    }

    /// The pidfile claim, once made.
    pub fn token(&self) -> Option<&IdentityToken> {
        self.token.as_ref()
    }

    /// Shared log channel handle.
    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    /// Claims the process identity; see the module docs for the order.
    pub fn claim(&mut self) -> Result<(), IdentityError> {
        let role = state::role();
        let spec = ChannelSpec {
            ident: self.cfg.log_ident(),
            syslog: !self.cfg.no_syslog,
            console: self.cfg.log_console,
            facility: self.cfg.facility,
            file: self.cfg.log_file_for(role),
        };
        if let Err(e) = self.sink.open(&spec) {
            warn!(label = e.as_label(), error = %e, "log file unavailable, logging without it");
            let without_file = ChannelSpec {
                file: None,
                ..spec.clone()
            };
            if let Err(e) = self.sink.open(&without_file) {
                warn!(label = e.as_label(), error = %e, "log channel unavailable");
            }
        }
        debug!(ident = %spec.ident, role = role.as_label(), "log channel open");

        if self.cfg.realtime {
            raise_priority();
        }

        let pid = Pid::this();
        let path = self.cfg.pidfile.clone();
        if !self.pidfile.write(&path, pid) {
            return Err(IdentityError::PidfileClaim { path });
        }
        info!(pid = %pid, path = %path.display(), "pidfile claimed");
        self.token = Some(IdentityToken { path, pid });

        if let Err(e) = unistd::chdir("/") {
            warn!(error = %e, "cannot change working directory to /");
        }
        umask(Mode::empty());
        Ok(())
    }

    /// Removes the pidfile if this guard wrote it.
    pub fn release_token(&mut self) {
        if let Some(token) = self.token.take() {
            self.pidfile.remove(&token.path);
            debug!(path = %token.path.display(), "pidfile released");
        }
    }

    /// Releases the pidfile and closes the log channel.
    pub fn release(&mut self) {
        self.release_token();
        self.sink.close();
    }
}

impl<P: Pidfile> Drop for IdentityGuard<P> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Best-effort SCHED_RR at the maximum priority.
fn raise_priority() {
    // SAFETY: plain syscalls on the calling process with a stack-allocated param.
    let rc = unsafe {
        let max = libc::sched_get_priority_max(libc::SCHED_RR);
        let param = libc::sched_param {
            sched_priority: max,
        };
        libc::sched_setscheduler(0, libc::SCHED_RR, &param)
    };
    if rc != 0 {
        warn!(
            error = %std::io::Error::last_os_error(),
            "cannot set realtime priority"
        );
    } else {
        debug!(role = Role::Worker.as_label(), "realtime priority set");
    }
}
