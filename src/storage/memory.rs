//! In-memory registry implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{Registry, RegistryEntry, StorageError};
use crate::core::run::TaskRun;
use crate::core::types::TaskName;

/// In-memory registry backend.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts.
pub struct InMemoryStorage {
    entries: RwLock<HashMap<TaskName, RegistryEntry>>,
    runs: RwLock<Vec<TaskRun>>,
}

impl InMemoryStorage {
    /// Create a new empty in-memory registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            runs: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for InMemoryStorage {
    async fn insert_entry(&self, entry: RegistryEntry) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        if entries.contains_key(&entry.name) {
            return Err(StorageError::DuplicateKey(format!("entry: {}", entry.name)));
        }
        entries.insert(entry.name.clone(), entry);
        Ok(())
    }

    async fn get_entry(&self, name: &TaskName) -> Result<Option<RegistryEntry>, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(name).cloned())
    }

    async fn update_entry(&self, entry: RegistryEntry) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        let slot = entries
            .get_mut(&entry.name)
            .ok_or_else(|| StorageError::NotFound(format!("entry: {}", entry.name)))?;
        *slot = entry;
        Ok(())
    }

    async fn list_entries(&self) -> Result<Vec<RegistryEntry>, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = entries.values().cloned().collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn save_run(&self, run: TaskRun) -> Result<(), StorageError> {
        let mut runs = self.runs.write().map_err(|_| StorageError::LockPoisoned)?;
        if runs.iter().any(|r| r.id == run.id) {
            return Err(StorageError::DuplicateKey(format!("run: {}", run.id)));
        }
        runs.push(run);
        Ok(())
    }

    async fn list_runs(&self, name: &TaskName, limit: usize) -> Result<Vec<TaskRun>, StorageError> {
        let runs = self.runs.read().map_err(|_| StorageError::LockPoisoned)?;
        // Insertion order is completion order, so newest are at the back.
        Ok(runs
            .iter()
            .rev()
            .filter(|r| &r.name == name)
            .take(limit)
            .cloned()
            .collect())
    }
}
