//! In-process remote store

use async_trait::async_trait;
use bytes::Bytes;
use histsync_core::{Error, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::store::{EntryKind, RemoteEntry, RemoteStore};
use crate::EndpointId;

/// Map-backed store. Object names may contain `/` to model subdirectories.
#[derive(Debug, Default)]
pub struct MemoryStore {
    name: String,
    objects: RwLock<BTreeMap<String, Bytes>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Names of all stored objects, sorted.
    pub fn object_names(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.objects.read().get(name).cloned()
    }

    /// Inserts or replaces an object without counting it as a write.
    pub fn put(&self, name: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.write().insert(name.into(), data.into());
    }

    /// Successful `write` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

fn normalize(name: &str) -> &str {
    name.trim_start_matches('/')
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.objects.read().contains_key(normalize(name)))
    }

    async fn read(&self, name: &str) -> Result<Bytes> {
        self.objects
            .read()
            .get(normalize(name))
            .cloned()
            .ok_or_else(|| Error::RemoteNotFound(name.to_string()))
    }

    async fn write(&self, name: &str, data: Bytes, overwrite: bool) -> Result<()> {
        let mut objects = self.objects.write();
        let key = normalize(name);
        if !overwrite && objects.contains_key(key) {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        objects.insert(key.to_string(), data);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match self.objects.write().remove(normalize(name)) {
            Some(_) => Ok(()),
            None => Err(Error::RemoteNotFound(name.to_string())),
        }
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let prefix = match path.trim_matches('/') {
            "" => String::new(),
            dir => format!("{}/", dir),
        };

        let objects = self.objects.read();
        let mut entries = Vec::new();
        let mut dirs = BTreeSet::new();
        for (key, data) in objects.iter() {
            let Some(rest) = key.strip_prefix(prefix.as_str()) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    dirs.insert(dir.to_string());
                }
                None => entries.push(RemoteEntry::file(rest, data.len() as u64)),
            }
        }
        entries.extend(dirs.into_iter().map(|name| RemoteEntry {
            name,
            kind: EntryKind::Directory,
            size: 0,
        }));
        Ok(entries)
    }

    fn target_id(&self) -> EndpointId {
        EndpointId::from_str(&format!("memory:{}", self.name))
    }
}
