//! # Engine collaborators: the work the worker hosts.
//!
//! The worker's [`LifecycleController`](crate::LifecycleController) knows nothing
//! about the protocol it serves. It drives an [`Engine`] through one runtime-state
//! generation at a time and reads configuration through a [`ConfigParser`].
//!
//! ```text
//! allocate() ──► parse_into(store) ──► complete(state, store) ──► dump(state)?
//!      │                                                             │
//!      └──────────── RuntimeState { epoch, store, engine, buffer } ◄─┘
//!                                       │
//!                  run loop ◄── startup(Arc<State>, EngineContext)   (first unit of work)
//!                                       │
//!                     reload / stop ──► release(Arc<State>)
//! ```
//!
//! ## Contents
//! - [`Engine`], [`EngineContext`], [`EngineError`]
//! - [`ConfigParser`], [`ConfigStore`], [`ConfigError`]
//! - [`RuntimeState`] one generation of worker state
//! - [`IdleEngine`], [`TomlConfigParser`] implementations used by the binary

mod idle;
mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::{ControlHandle, ReloadEpoch};

pub use idle::{IdleEngine, TomlConfigParser};
pub use store::ConfigStore;

/// Error reported by an [`Engine`].
#[derive(Error, Debug)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    /// Creates an error with a one-line cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// # Errors produced while reading the configuration file.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read {path:?}: {source}")]
    Read {
        /// Configuration file path.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML.
    #[error("cannot parse {path:?}: {source}")]
    Parse {
        /// Configuration file path.
        path: PathBuf,
        /// Parser error (with line/column).
        #[source]
        source: toml::de::Error,
    },

    /// The file parsed but a value is unacceptable.
    #[error("invalid value for {key}: {reason}")]
    Invalid {
        /// Offending key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "config_read",
            ConfigError::Parse { .. } => "config_parse",
            ConfigError::Invalid { .. } => "config_invalid",
        }
    }
}

/// Handed to [`Engine::startup`].
#[derive(Clone)]
pub struct EngineContext {
    /// Cancelled when the run loop hosting this generation is destroyed.
    pub token: CancellationToken,
    /// Requests reload or terminate from inside the worker.
    pub control: ControlHandle,
    /// Generation being started.
    pub epoch: ReloadEpoch,
}

/// # The protocol engine hosted by the worker.
///
/// One `State` value is one generation: built by [`allocate`](Engine::allocate)
/// and [`complete`](Engine::complete), started once, released once. During a reload
/// the next generation is fully built while the previous one is still held.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use procvisor::engine::{ConfigStore, Engine, EngineContext, EngineError};
///
/// struct Echo;
///
/// #[async_trait]
/// impl Engine for Echo {
///     type State = Vec<String>;
///
///     fn name(&self) -> &str { "echo" }
///
///     fn allocate(&self) -> Result<Self::State, EngineError> { Ok(Vec::new()) }
///
///     fn complete(&self, state: &mut Self::State, store: &ConfigStore) -> Result<(), EngineError> {
///         state.extend(store.keys().map(str::to_owned));
///         Ok(())
///     }
///
///     async fn startup(&self, _state: Arc<Self::State>, ctx: EngineContext) -> Result<(), EngineError> {
///         ctx.token.cancelled().await;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    /// Runtime state of one generation.
    type State: Send + Sync + 'static;

    /// Stable name used in logs.
    fn name(&self) -> &str;

    /// Allocates an empty state. Failure is fatal to the worker.
    fn allocate(&self) -> Result<Self::State, EngineError>;

    /// Post-parse completion pass over freshly parsed configuration.
    fn complete(&self, state: &mut Self::State, store: &ConfigStore) -> Result<(), EngineError>;

    /// Dumps the completed state to the log.
    fn dump(&self, _state: &Self::State) {}

    /// Runs the generation until `ctx.token` is cancelled.
    async fn startup(&self, state: Arc<Self::State>, ctx: EngineContext)
        -> Result<(), EngineError>;

    /// Releases a generation that is no longer served.
    fn release(&self, state: Arc<Self::State>) {
        drop(state);
    }
}

/// Reads a configuration file into a [`ConfigStore`].
pub trait ConfigParser: Send + Sync + 'static {
    /// Parses `path` into `store`.
    fn parse_into(&self, path: &Path, store: &mut ConfigStore) -> Result<(), ConfigError>;
}

/// One generation of worker runtime state.
///
/// Resources are acquired in field order (store, engine, buffer) and released
/// in reverse.
pub struct RuntimeState<S> {
    /// Generation number.
    pub epoch: ReloadEpoch,
    /// Parsed configuration.
    pub store: ConfigStore,
    /// Engine state, shared read-only with the running engine.
    pub engine: Arc<S>,
    /// Scratch buffer sized from `Config::buffer_size`.
    pub buffer: Vec<u8>,
}
