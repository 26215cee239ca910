//! Error types used by the procvisor supervisor and worker.
//!
//! This module defines the error enums of the two process roles:
//!
//! - [`LaunchError`]: the process split (worker spawn) failed.
//! - [`IdentityError`]: the worker could not claim its identity (pidfile, log channel).
//! - [`StartupError`]: the worker could not build a runtime-state generation.
//! - [`RuntimeError`]: failures of the run loop or of the supervisor itself.
//!
//! Every enum provides [`as_label`](RuntimeError::as_label), a short stable label
//! for structured log fields.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::engine::{ConfigError, EngineError};

/// # Errors produced while splitting into supervisor and worker.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The worker process could not be spawned.
    #[error("cannot spawn worker process: {source}")]
    Spawn {
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The path of the running executable could not be resolved.
    #[error("cannot resolve current executable: {source}")]
    CurrentExe {
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A supervisor-side launch returned the worker view.
    ///
    /// Only the first launch of a process started with the worker role marker
    /// may take the worker path.
    #[error("worker role requested from supervisor context")]
    UnexpectedWorker,
}

impl LaunchError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use procvisor::LaunchError;
    ///
    /// let err = LaunchError::UnexpectedWorker;
    /// assert_eq!(err.as_label(), "launch_unexpected_worker");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            LaunchError::Spawn { .. } => "launch_spawn",
            LaunchError::CurrentExe { .. } => "launch_current_exe",
            LaunchError::UnexpectedWorker => "launch_unexpected_worker",
        }
    }
}

/// # Errors produced while claiming the worker identity.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum IdentityError {
    /// The pidfile could not be written (or is held by a live process).
    #[error("cannot write pidfile {path:?}")]
    PidfileClaim {
        /// Pidfile path.
        path: PathBuf,
    },

    /// The log file could not be opened.
    #[error("cannot open log file {path:?}: {source}")]
    LogFile {
        /// Log file path (already qualified with role and instance).
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

impl IdentityError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            IdentityError::PidfileClaim { .. } => "identity_pidfile_claim",
            IdentityError::LogFile { .. } => "identity_log_file",
        }
    }
}

/// # Errors produced while building a runtime-state generation.
///
/// All of them are fatal to the worker: there is no partial-start or
/// partial-reload recovery.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StartupError {
    /// The engine could not allocate its state.
    #[error("cannot allocate runtime state: {0}")]
    Allocate(#[source] EngineError),

    /// The configuration file could not be parsed.
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    /// The post-parse completion pass rejected the configuration.
    #[error("configuration completion failed: {0}")]
    Complete(#[source] EngineError),

    /// A fresh run loop could not be created.
    #[error("cannot create run loop: {0}")]
    RunLoop(#[source] std::io::Error),

    /// Signal routes could not be installed on the run loop.
    #[error("cannot install signal routes: {0}")]
    Signals(#[source] std::io::Error),
}

impl StartupError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use procvisor::StartupError;
    /// use procvisor::engine::EngineError;
    ///
    /// let err = StartupError::Allocate(EngineError::new("out of memory"));
    /// assert_eq!(err.as_label(), "startup_allocate");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            StartupError::Allocate(_) => "startup_allocate",
            StartupError::Config(_) => "startup_config",
            StartupError::Complete(_) => "startup_complete",
            StartupError::RunLoop(_) => "startup_run_loop",
            StartupError::Signals(_) => "startup_signals",
        }
    }
}

/// # Errors produced by the supervisor runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The worker could not be launched.
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// The parent run loop could not be built or its routes installed.
    #[error("run loop: {0}")]
    RunLoop(#[source] std::io::Error),

    /// Shutdown grace period was exceeded; the worker had to be killed.
    #[error("shutdown timeout {grace:?} exceeded; worker pid {pid} killed")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// The worker that did not exit in time.
        pid: i32,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use procvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), pid: 42 };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Launch(_) => "runtime_launch",
            RuntimeError::RunLoop(_) => "runtime_run_loop",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}
