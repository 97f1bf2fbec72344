//! Remote object store abstraction and endpoint descriptions.
//!
//! The sync engine only needs a flat namespace of named blobs: read, write
//! (optionally refusing to overwrite), delete, and a one-level directory
//! listing. WebDAV, a local directory and an in-memory map all provide that.

use async_trait::async_trait;
use bytes::Bytes;
use histsync_core::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::EndpointId;

pub mod filesystem;
pub mod memory;
pub mod webdav;

pub use filesystem::FileSystemStore;
pub use memory::MemoryStore;
pub use webdav::WebDavStore;

/// Name of the full snapshot object.
pub const SNAPSHOT_NAME: &str = "browser-history-total.json";
/// Prefix shared by all increment objects.
pub const INCREMENT_PREFIX: &str = "browser-history-increment-";
const INCREMENT_SUFFIX: &str = ".json";

/// Object name for an increment uploaded at `timestamp_ms`.
pub fn increment_name(timestamp_ms: i64) -> String {
    format!("{}{}{}", INCREMENT_PREFIX, timestamp_ms, INCREMENT_SUFFIX)
}

/// Upload timestamp embedded in an increment name, if it is one.
pub fn increment_timestamp(name: &str) -> Option<i64> {
    name.strip_prefix(INCREMENT_PREFIX)?
        .strip_suffix(INCREMENT_SUFFIX)?
        .parse()
        .ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
}

/// One item of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Base name, without any directory part.
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            size,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Flat remote namespace used for snapshots and increments.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Fails with `Error::RemoteNotFound` when the object is absent.
    async fn read(&self, name: &str) -> Result<Bytes>;

    /// With `overwrite == false`, fails with `Error::AlreadyExists` instead of
    /// replacing an existing object.
    async fn write(&self, name: &str, data: Bytes, overwrite: bool) -> Result<()>;

    async fn delete(&self, name: &str) -> Result<()>;

    /// Lists the immediate children of `path` (`"/"` is the store root).
    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Stable identity of the remote target, used to serialize operations.
    fn target_id(&self) -> EndpointId;
}

/// Description of a remote target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemoteEndpoint {
    /// WebDAV collection
    WebDav {
        url: String,
        username: String,
        password: String,
    },
    /// Local directory standing in for a remote
    FileSystem { path: String },
    /// Process-local store, mainly for tests
    Memory { name: String },
}

impl RemoteEndpoint {
    /// Get a unique identifier for this endpoint
    pub fn endpoint_id(&self) -> EndpointId {
        let id_str = match self {
            Self::WebDav { url, username, .. } => {
                format!("webdav:{}@{}", username, url.trim_end_matches('/'))
            }
            Self::FileSystem { path } => format!("file:{}", path),
            Self::Memory { name } => format!("memory:{}", name),
        };
        EndpointId::from_str(&id_str)
    }

    /// Builds the store this endpoint describes.
    pub fn connect(&self) -> Result<Arc<dyn RemoteStore>> {
        Ok(match self {
            Self::WebDav {
                url,
                username,
                password,
            } => Arc::new(WebDavStore::new(url, username, password)?),
            Self::FileSystem { path } => Arc::new(FileSystemStore::new(path)),
            Self::Memory { name } => Arc::new(MemoryStore::new(name.as_str())),
        })
    }

    pub fn endpoint_type(&self) -> &str {
        match self {
            Self::WebDav { .. } => "webdav",
            Self::FileSystem { .. } => "filesystem",
            Self::Memory { .. } => "memory",
        }
    }
}
