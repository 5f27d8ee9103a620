//! Per-file readers-writer locks
//!
//! Locks are created on demand and dropped from the table as soon as no
//! task holds or waits on them, so the table only ever contains names with
//! an operation in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

#[derive(Debug, Default)]
pub struct FileLockTable {
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

enum Held {
    Read(OwnedRwLockReadGuard<()>),
    Write(OwnedRwLockWriteGuard<()>),
}

/// Shared or exclusive access to one filename. Released on drop.
pub struct FileGuard {
    table: Arc<FileLockTable>,
    name: String,
    held: Option<Held>,
}

impl FileGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self.held, Some(Held::Write(_)))
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        // Release before checking whether anyone else still references the lock
        self.held.take();
        self.table.evict_if_idle(&self.name);
    }
}

impl FileLockTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn entry(&self, name: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    fn evict_if_idle(&self, name: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Only the table's own reference left: no holder, no waiter
        if locks
            .get(name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(name);
        }
    }

    /// Shared access (downloads)
    pub async fn read(self: &Arc<Self>, name: &str) -> FileGuard {
        let guard = self.entry(name).read_owned().await;
        FileGuard {
            table: self.clone(),
            name: name.to_string(),
            held: Some(Held::Read(guard)),
        }
    }

    /// Exclusive access (uploads, deletes)
    pub async fn write(self: &Arc<Self>, name: &str) -> FileGuard {
        let guard = self.entry(name).write_owned().await;
        FileGuard {
            table: self.clone(),
            name: name.to_string(),
            held: Some(Held::Write(guard)),
        }
    }

    /// Number of names with a lock currently in the table
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
