//! # Supervisor and worker configuration.
//!
//! [`Config`] is filled once, before the process split, and read by both roles:
//! the supervisor uses the respawn and watchdog settings, the worker uses the
//! identity and runtime settings.
//!
//! ## Sentinel values
//! - `instance_name = None`, `network_namespace = None` → plain program ident
//! - `grace = 0s` → SIGKILL immediately after SIGTERM on stop
//! - `buffer_size = 0` → no scratch buffer allocated
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use procvisor::{Config, RespawnPolicy};
//!
//! let mut cfg = Config::default();
//! cfg.instance_name = Some("lab".into());
//! cfg.respawn = RespawnPolicy::after(Duration::from_secs(2));
//!
//! assert_eq!(cfg.log_ident(), "procvisor_lab");
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::Role;
use crate::policies::RespawnPolicy;

/// Configuration shared by supervisor and worker.
///
/// ## Field semantics
/// - `program`: base of the log identifier and file names
/// - `pidfile`: claimed by the worker, never created with parent directories
/// - `respawn`: what the supervisor does when the worker dies
/// - `watchdog_interval`: period of the no-death watchdog tick
/// - `grace`: stop timeout before the worker is killed
#[derive(Clone, Debug)]
pub struct Config {
    /// Engine configuration file (TOML).
    pub config_file: PathBuf,

    /// Pidfile written by the worker.
    pub pidfile: PathBuf,

    /// Program name used for the log identifier.
    pub program: String,

    /// Instance name qualifying the log identifier and log file.
    pub instance_name: Option<String>,

    /// Network namespace qualifying the log identifier and log file.
    pub network_namespace: Option<String>,

    /// Append-mode log file (qualified per role, namespace and instance).
    pub log_file: Option<PathBuf>,

    /// Syslog facility (`libc::LOG_*`).
    pub facility: libc::c_int,

    /// Echo records on the console.
    pub log_console: bool,

    /// Do not write to syslog.
    pub no_syslog: bool,

    /// Dump the parsed configuration after each build.
    pub dump_config: bool,

    /// Worker respawn policy.
    pub respawn: RespawnPolicy,

    /// Period of the watchdog tick for a live worker.
    pub watchdog_interval: Duration,

    /// Maximum wait for the worker to exit after SIGTERM.
    ///
    /// When exceeded the worker is sent SIGKILL and
    /// `RuntimeError::GraceExceeded` is logged.
    pub grace: Duration,

    /// Request realtime scheduling (SCHED_RR) for the worker.
    pub realtime: bool,

    /// Size of the per-generation scratch buffer in bytes.
    pub buffer_size: usize,
}

impl Config {
    /// Log identifier: `program`, or `program_<netns>_<instance>` with absent
    /// parts skipped.
    pub fn log_ident(&self) -> String {
        let mut ident = self.program.clone();
        for part in [&self.network_namespace, &self.instance_name]
            .into_iter()
            .flatten()
        {
            ident.push('_');
            ident.push_str(part);
        }
        ident
    }

    /// Log file for `role`: `<stem>_<role>[_<netns>][_<instance>].<ext>`.
    ///
    /// `None` when no log file is configured.
    pub fn log_file_for(&self, role: Role) -> Option<PathBuf> {
        let base = self.log_file.as_deref()?;
        let stem = base.file_stem()?.to_string_lossy();

        let mut name = format!("{stem}_{}", role.as_label());
        for part in [&self.network_namespace, &self.instance_name]
            .into_iter()
            .flatten()
        {
            name.push('_');
            name.push_str(part);
        }
        if let Some(ext) = base.extension() {
            name.push('.');
            name.push_str(&ext.to_string_lossy());
        }
        Some(base.with_file_name(name))
    }

    /// Stop grace as an `Option` (`None` → kill immediately).
    #[inline]
    pub fn stop_grace(&self) -> Option<Duration> {
        if self.grace.is_zero() {
            None
        } else {
            Some(self.grace)
        }
    }

    /// Scratch buffer size as an `Option` (`None` → no buffer).
    #[inline]
    pub fn buffer_len(&self) -> Option<usize> {
        (self.buffer_size > 0).then_some(self.buffer_size)
    }

    /// Engine configuration file.
    pub fn config_path(&self) -> &Path {
        &self.config_file
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `respawn = RespawnPolicy::default()` (respawn after 1s)
    /// - `watchdog_interval = 60s`
    /// - `grace = 10s`
    /// - `facility = LOG_DAEMON`, syslog on, console off
    fn default() -> Self {
        Self {
            config_file: PathBuf::from("/etc/procvisor/procvisor.toml"),
            pidfile: PathBuf::from("/run/procvisor.pid"),
            program: "procvisor".to_string(),
            instance_name: None,
            network_namespace: None,
            log_file: None,
            facility: libc::LOG_DAEMON,
            log_console: false,
            no_syslog: false,
            dump_config: false,
            respawn: RespawnPolicy::default(),
            watchdog_interval: Duration::from_secs(60),
            grace: Duration::from_secs(10),
            realtime: false,
            buffer_size: 64 * 1024,
        }
    }
}
