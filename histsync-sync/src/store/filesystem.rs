//! Directory-backed remote store.
//!
//! Lets a shared or mounted folder act as the sync target.

use async_trait::async_trait;
use bytes::Bytes;
use histsync_core::{Error, Result};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::store::{EntryKind, RemoteEntry, RemoteStore};
use crate::EndpointId;

pub struct FileSystemStore {
    root: PathBuf,
}

impl FileSystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `name` under the root, rejecting anything that escapes it.
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(Error::InvalidArgument(format!("invalid object name: {}", name)));
        }
        Ok(self.root.join(relative))
    }
}

fn not_found_as(name: &str, e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::NotFound {
        Error::RemoteNotFound(name.to_string())
    } else {
        Error::Io(e)
    }
}

#[async_trait]
impl RemoteStore for FileSystemStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.resolve(name)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn read(&self, name: &str) -> Result<Bytes> {
        let path = self.resolve(name)?;
        let data = fs::read(&path).await.map_err(|e| not_found_as(name, e))?;
        Ok(Bytes::from(data))
    }

    async fn write(&self, name: &str, data: Bytes, overwrite: bool) -> Result<()> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        if overwrite {
            // Write to a sibling and rename so readers never see a torn object.
            let tmp = path.with_extension("tmp");
            fs::write(&tmp, &data).await?;
            fs::rename(&tmp, &path).await?;
            return Ok(());
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    Error::AlreadyExists(name.to_string())
                } else {
                    Error::Io(e)
                }
            })?;
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        fs::remove_file(&path).await.map_err(|e| not_found_as(name, e))
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let dir = self.resolve(path)?;
        let mut reader = match fs::read_dir(&dir).await {
            Ok(reader) => reader,
            // An empty target has simply not been created yet.
            Err(e) if e.kind() == ErrorKind::NotFound && dir == self.root => return Ok(Vec::new()),
            Err(e) => return Err(not_found_as(path, e)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let meta = entry.metadata().await?;
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(RemoteEntry {
                name,
                kind: if meta.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
                size: if meta.is_dir() { 0 } else { meta.len() },
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn target_id(&self) -> EndpointId {
        EndpointId::from_str(&format!("file:{}", self.root.display()))
    }
}
