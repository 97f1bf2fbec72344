//! Key/value storage for sync state and settings.
//!
//! Values are JSON so that the on-disk layout matches what other clients of
//! the same keys expect (`lastSyncTimestamp` as a number, `pendingSyncData`
//! as an array of records, and so on).

use async_trait::async_trait;
use histsync_core::{Error, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Keys touched by one `set` or `remove` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvChange {
    pub keys: Vec<String>,
}

impl KvChange {
    pub fn touches(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns only the keys that are present.
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>>;

    async fn set(&self, entries: HashMap<String, Value>) -> Result<()>;

    async fn remove(&self, keys: &[&str]) -> Result<()>;

    /// Change notifications for every successful `set` or `remove`.
    fn subscribe(&self) -> broadcast::Receiver<KvChange>;
}

/// Convenience accessors over [`KeyValueStore`].
#[async_trait]
pub trait KeyValueStoreExt: KeyValueStore {
    async fn get_one(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get(&[key]).await?.remove(key))
    }

    async fn set_one(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = HashMap::with_capacity(1);
        entries.insert(key.to_string(), value);
        self.set(entries).await
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStoreExt for T {}

pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, Value>>,
    changes: broadcast::Sender<KvChange>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            changes,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn notify(&self, keys: Vec<String>) {
        // No receivers is fine.
        let _ = self.changes.send(KvChange { keys });
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let entries = self.entries.read();
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, entries: HashMap<String, Value>) -> Result<()> {
        let keys: Vec<String> = entries.keys().cloned().collect();
        self.entries.write().extend(entries);
        self.notify(keys);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        {
            let mut entries = self.entries.write();
            for key in keys {
                entries.remove(*key);
            }
        }
        self.notify(keys.iter().map(|k| k.to_string()).collect());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<KvChange> {
        self.changes.subscribe()
    }
}

/// Key/value store persisted as one JSON object on disk.
///
/// The whole map is kept in memory and rewritten on every change.
pub struct JsonFileKvStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, Value>>,
    write_lock: Mutex<()>,
    changes: broadcast::Sender<KvChange>,
}

impl JsonFileKvStore {
    /// Opens `path`, starting empty if the file does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(json) if json.trim().is_empty() => HashMap::new(),
            Ok(json) => serde_json::from_str(&json).map_err(|e| {
                Error::Config(format!("corrupt state file {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), keys = entries.len(), "opened state file");

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            path,
            entries: RwLock::new(entries),
            write_lock: Mutex::new(()),
            changes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&*self.entries.read())?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileKvStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let entries = self.entries.read();
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, entries: HashMap<String, Value>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let keys: Vec<String> = entries.keys().cloned().collect();
        self.entries.write().extend(entries);
        self.persist().await?;
        let _ = self.changes.send(KvChange { keys });
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        {
            let mut entries = self.entries.write();
            for key in keys {
                entries.remove(*key);
            }
        }
        self.persist().await?;
        let _ = self.changes.send(KvChange {
            keys: keys.iter().map(|k| k.to_string()).collect(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<KvChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_get_set_remove() {
        let kv = MemoryKvStore::new();
        let mut rx = kv.subscribe();

        kv.set_one("a", json!(1)).await.unwrap();
        kv.set_one("b", json!("x")).await.unwrap();

        let got = kv.get(&["a", "b", "missing"]).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got["a"], json!(1));

        kv.remove(&["a"]).await.unwrap();
        assert!(kv.get_one("a").await.unwrap().is_none());

        assert!(rx.recv().await.unwrap().touches("a"));
        assert!(rx.recv().await.unwrap().touches("b"));
        assert!(rx.recv().await.unwrap().touches("a"));
    }

    #[tokio::test]
    async fn test_json_file_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("kv.json");

        {
            let kv = JsonFileKvStore::open(&path).await.unwrap();
            kv.set_one("lastSyncTimestamp", json!(1234)).await.unwrap();
            kv.set_one("syncEnabled", json!(false)).await.unwrap();
            kv.remove(&["syncEnabled"]).await.unwrap();
        }

        let kv = JsonFileKvStore::open(&path).await.unwrap();
        assert_eq!(kv.get_one("lastSyncTimestamp").await.unwrap(), Some(json!(1234)));
        assert!(kv.get_one("syncEnabled").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_file_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        assert!(matches!(JsonFileKvStore::open(&path).await, Err(Error::Config(_))));
    }
}
