//! Per-name locks.
//!
//! [`KeyedLocks`] serializes read-modify-write cycles on one registry entry.
//! [`InFlight`] is the single-flight guard that keeps at most one invocation
//! of a task name executing at a time.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::core::types::TaskName;

/// Async mutex per task name, created on first use.
#[derive(Default)]
pub(crate) struct KeyedLocks {
    locks: Mutex<HashMap<TaskName, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn slot(&self, name: &TaskName) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(name.clone()).or_default())
    }

    /// Wait for exclusive access to the entry for `name`.
    pub(crate) async fn lock(&self, name: &TaskName) -> OwnedMutexGuard<()> {
        self.slot(name).lock_owned().await
    }
}

/// Set of task names with an invocation currently executing.
#[derive(Default)]
pub(crate) struct InFlight {
    names: Arc<Mutex<HashSet<TaskName>>>,
}

impl InFlight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Claim `name`, or `None` if an invocation is already executing.
    pub(crate) fn try_acquire(&self, name: &TaskName) -> Option<InFlightGuard> {
        let mut names = self.names.lock().unwrap_or_else(|e| e.into_inner());
        if !names.insert(name.clone()) {
            return None;
        }
        Some(InFlightGuard {
            names: Arc::clone(&self.names),
            name: name.clone(),
        })
    }

    /// Whether an invocation of `name` is executing.
    pub(crate) fn contains(&self, name: &TaskName) -> bool {
        self.names
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(name)
    }
}

/// Releases the single-flight claim when dropped.
pub(crate) struct InFlightGuard {
    names: Arc<Mutex<HashSet<TaskName>>>,
    name: TaskName,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut names = self.names.lock().unwrap_or_else(|e| e.into_inner());
        names.remove(&self.name);
    }
}
