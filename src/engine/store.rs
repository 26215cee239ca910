use std::path::{Path, PathBuf};

/// Parsed configuration of one generation.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    table: toml::Table,
    source: Option<PathBuf>,
}

impl ConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// File the store was last filled from.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub(crate) fn set_source(&mut self, path: &Path) {
        self.source = Some(path.to_path_buf());
    }

    /// Top-level value by key.
    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.table.get(key)
    }

    /// Top-level table by name.
    pub fn section(&self, name: &str) -> Option<&toml::Table> {
        self.table.get(name).and_then(toml::Value::as_table)
    }

    /// Top-level keys, in file order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    /// Sets a top-level value.
    pub fn insert(&mut self, key: impl Into<String>, value: toml::Value) {
        self.table.insert(key.into(), value);
    }

    /// Merges `other` over the current values (later keys win).
    pub fn merge(&mut self, other: toml::Table) {
        self.table.extend(other);
    }

    /// Number of top-level keys.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
