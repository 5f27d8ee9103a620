//! File table: the coordinator's authoritative index of filename → location
//!
//! Guarded by one readers-writer lock over the whole table. Lookups run
//! concurrently; any mutation excludes everything else.

use crate::common::protocol::FileRecord;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct FileTable {
    files: RwLock<HashMap<String, FileRecord>>,
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Duplicate checks are the caller's job.
    pub async fn put(&self, record: FileRecord) {
        self.files
            .write()
            .await
            .insert(record.filename.clone(), record);
    }

    /// Remove a record; `true` if it existed
    pub async fn remove(&self, name: &str) -> bool {
        self.files.write().await.remove(name).is_some()
    }

    pub async fn get(&self, name: &str) -> Option<FileRecord> {
        self.files.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.files.read().await.contains_key(name)
    }

    /// Point-in-time copy of every record
    pub async fn list_all(&self) -> BTreeMap<String, FileRecord> {
        self.files
            .read()
            .await
            .iter()
            .map(|(name, record)| (name.clone(), record.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, size: u64, location: &str) -> FileRecord {
        FileRecord {
            filename: name.to_string(),
            size,
            location: location.to_string(),
        }
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let table = FileTable::new();
        table.put(record("a.txt", 100, "127.0.0.1:9001")).await;

        let got = table.get("a.txt").await.unwrap();
        assert_eq!(got.size, 100);
        assert_eq!(got.location, "127.0.0.1:9001");

        assert!(table.remove("a.txt").await);
        assert!(!table.remove("a.txt").await);
        assert!(table.get("a.txt").await.is_none());
    }

    #[tokio::test]
    async fn test_put_is_last_write_wins() {
        let table = FileTable::new();
        table.put(record("a.txt", 1, "n1")).await;
        table.put(record("a.txt", 2, "n2")).await;

        assert_eq!(table.len().await, 1);
        assert_eq!(table.get("a.txt").await.unwrap().location, "n2");
    }

    #[tokio::test]
    async fn test_list_all_is_a_snapshot() {
        let table = FileTable::new();
        table.put(record("a.txt", 1, "n1")).await;
        table.put(record("b.txt", 2, "n1")).await;

        let snapshot = table.list_all().await;
        table.remove("a.txt").await;

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains_key("a.txt"));
        assert_eq!(table.len().await, 1);
    }
}
