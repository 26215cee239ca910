use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{ConfigError, ConfigParser, ConfigStore, Engine, EngineContext, EngineError};

/// Engine serving nothing: it holds its configuration until cancelled.
///
/// Used by the shipped binary so the supervision machinery can run without a
/// protocol implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleEngine;

/// State of an [`IdleEngine`] generation.
#[derive(Debug, Default)]
pub struct IdleState {
    /// Top-level configuration keys seen by the completion pass.
    pub keys: Vec<String>,
}

#[async_trait]
impl Engine for IdleEngine {
    type State = IdleState;

    fn name(&self) -> &str {
        "idle"
    }

    fn allocate(&self) -> Result<IdleState, EngineError> {
        Ok(IdleState::default())
    }

    fn complete(&self, state: &mut IdleState, store: &ConfigStore) -> Result<(), EngineError> {
        state.keys = store.keys().map(str::to_owned).collect();
        Ok(())
    }

    fn dump(&self, state: &IdleState) {
        info!(keys = ?state.keys, "------< idle engine configuration >------");
    }

    async fn startup(&self, state: Arc<IdleState>, ctx: EngineContext) -> Result<(), EngineError> {
        info!(epoch = %ctx.epoch, keys = state.keys.len(), "idle engine started");
        ctx.token.cancelled().await;
        Ok(())
    }
}

/// [`ConfigParser`] reading a TOML file.
///
/// A missing file yields an empty store; any other read or parse failure is an
/// error.
#[derive(Debug, Default, Clone, Copy)]
pub struct TomlConfigParser;

impl ConfigParser for TomlConfigParser {
    fn parse_into(&self, path: &Path, store: &mut ConfigStore) -> Result<(), ConfigError> {
        store.set_source(path);
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let table = text
            .parse::<toml::Table>()
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        store.merge(table);
        Ok(())
    }
}
