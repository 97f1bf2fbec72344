/// Test utilities and helpers for histsync testing
///
/// Synthetic history generators, instrumented sources and stores that can be
/// told to fail, and a `TestDevice` wiring an engine to a shared remote.

use async_trait::async_trait;
use bytes::Bytes;
use histsync_core::{
    Error, HistoryFetcher, HistoryRecord, HistorySource, ManualClock, MemoryHistorySource,
    RawHistoryItem, RawVisit, Result,
};
use histsync_sync::store::{FileSystemStore, MemoryStore, RemoteEntry, RemoteStore};
use histsync_sync::{Cipher, EndpointId, MemoryKvStore, SingleFlight, SyncEngine, SyncStateStore};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// 2023-11-14T22:13:20Z
pub const NOW: i64 = 1_700_000_000_000;

/// `count` items, newest at `newest`, each `spacing_ms` older than the last.
/// Every item has a distinct url, ids are `"0"`, `"1"`, ... and urls cycle
/// over 50 hosts.
pub fn synthetic_items(count: usize, newest: i64, spacing_ms: i64) -> Vec<RawHistoryItem> {
    (0..count)
        .map(|i| {
            RawHistoryItem::new(
                format!("https://site{}.example/page/{}", i % 50, i),
                newest - i as i64 * spacing_ms,
            )
            .with_id(i.to_string())
            .with_title(format!("Page {}", i))
            .with_visit_count((i % 7) as u32 + 1)
        })
        .collect()
}

pub fn synthetic_source(count: usize, newest: i64, spacing_ms: i64) -> MemoryHistorySource {
    MemoryHistorySource::from_items(synthetic_items(count, newest, spacing_ms))
}

pub fn record(id: &str, url: &str, t: i64, visits: u32) -> HistoryRecord {
    HistoryRecord {
        id: Some(id.to_string()),
        url: url.to_string(),
        title: format!("title of {}", url),
        last_visit_time: t,
        visit_count: visits,
        formatted_time: String::new(),
    }
}

/// Source wrapper recording every `[start, end)` queried, optionally failing
/// windows that contain a given instant.
pub struct InstrumentedSource {
    inner: MemoryHistorySource,
    calls: Mutex<Vec<(i64, i64, usize)>>,
    fail_containing: Mutex<Option<i64>>,
}

impl InstrumentedSource {
    pub fn new(inner: MemoryHistorySource) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
            fail_containing: Mutex::new(None),
        }
    }

    /// Windows covering `instant` fail with `Error::SourceQuery`, except the
    /// initial probe (the first call).
    pub fn fail_windows_containing(&self, instant: i64) {
        *self.fail_containing.lock() = Some(instant);
    }

    /// `(start, end, returned)` per call, in order.
    pub fn calls(&self) -> Vec<(i64, i64, usize)> {
        self.calls.lock().clone()
    }

    pub fn inner(&self) -> &MemoryHistorySource {
        &self.inner
    }
}

#[async_trait]
impl HistorySource for InstrumentedSource {
    async fn search(&self, start: i64, end: i64, cap: usize) -> Result<Vec<RawHistoryItem>> {
        let is_probe = self.calls.lock().is_empty();
        if let Some(instant) = *self.fail_containing.lock() {
            if !is_probe && start <= instant && instant < end {
                self.calls.lock().push((start, end, 0));
                return Err(Error::SourceQuery(format!("window [{}, {}) unavailable", start, end)));
            }
        }
        let items = self.inner.search(start, end, cap).await?;
        self.calls.lock().push((start, end, items.len()));
        Ok(items)
    }

    async fn get_visits(&self, url: &str) -> Result<Vec<RawVisit>> {
        self.inner.get_visits(url).await
    }
}

/// Remote store wrapper that can fail writes, reads or deletes on demand.
pub struct FlakyStore {
    inner: Arc<dyn RemoteStore>,
    failing_writes: AtomicUsize,
    write_error: Mutex<Option<Error>>,
    unreadable: Mutex<HashSet<String>>,
    undeletable: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn RemoteStore>) -> Self {
        Self {
            inner,
            failing_writes: AtomicUsize::new(0),
            write_error: Mutex::new(None),
            unreadable: Mutex::new(HashSet::new()),
            undeletable: Mutex::new(HashSet::new()),
        }
    }

    /// The next `n` writes fail with a connection error.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
        *self.write_error.lock() = None;
    }

    /// The next `n` writes fail with `error`.
    pub fn fail_next_writes_with(&self, n: usize, error: Error) {
        self.failing_writes.store(n, Ordering::SeqCst);
        *self.write_error.lock() = Some(error);
    }

    pub fn make_unreadable(&self, name: &str) {
        self.unreadable.lock().insert(name.to_string());
    }

    /// Deletes of `name` fail with a connection error until [`FlakyStore::heal`].
    pub fn make_undeletable(&self, name: &str) {
        self.undeletable.lock().insert(name.to_string());
    }

    /// Clears every injected read and delete failure.
    pub fn heal(&self) {
        self.unreadable.lock().clear();
        self.undeletable.lock().clear();
    }

    fn take_write_failure(&self) -> Option<Error> {
        let remaining = self.failing_writes.load(Ordering::SeqCst);
        if remaining == 0 {
            return None;
        }
        self.failing_writes.store(remaining - 1, Ordering::SeqCst);
        Some(match &*self.write_error.lock() {
            Some(Error::RemoteAuth(msg)) => Error::RemoteAuth(msg.clone()),
            Some(Error::Config(msg)) => Error::Config(msg.clone()),
            Some(other) => Error::Internal(other.to_string()),
            None => Error::RemoteConnection("injected write failure".to_string()),
        })
    }
}

#[async_trait]
impl RemoteStore for FlakyStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        self.inner.exists(name).await
    }

    async fn read(&self, name: &str) -> Result<Bytes> {
        if self.unreadable.lock().contains(name) {
            return Err(Error::RemoteConnection(format!("injected read failure for {}", name)));
        }
        self.inner.read(name).await
    }

    async fn write(&self, name: &str, data: Bytes, overwrite: bool) -> Result<()> {
        if let Some(e) = self.take_write_failure() {
            return Err(e);
        }
        self.inner.write(name, data, overwrite).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        if self.undeletable.lock().contains(name) {
            return Err(Error::RemoteConnection(format!("injected delete failure for {}", name)));
        }
        self.inner.delete(name).await
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        self.inner.list_directory(path).await
    }

    fn target_id(&self) -> EndpointId {
        self.inner.target_id()
    }
}

/// One simulated browser: its own history, clock and local state, talking to
/// a remote that may be shared with other devices.
pub struct TestDevice {
    pub source: Arc<MemoryHistorySource>,
    pub clock: Arc<ManualClock>,
    pub kv: Arc<MemoryKvStore>,
    pub engine: SyncEngine,
}

impl TestDevice {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self::with_options(remote, None, SingleFlight::new())
    }

    pub fn with_cipher(remote: Arc<dyn RemoteStore>, cipher: Arc<dyn Cipher>) -> Self {
        Self::with_options(remote, Some(cipher), SingleFlight::new())
    }

    pub fn with_options(
        remote: Arc<dyn RemoteStore>,
        cipher: Option<Arc<dyn Cipher>>,
        guard: SingleFlight,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(NOW));
        let source = Arc::new(MemoryHistorySource::new());
        let kv = Arc::new(MemoryKvStore::new());
        let fetcher = Arc::new(HistoryFetcher::new(source.clone()).with_clock(clock.clone()));
        let state = SyncStateStore::new(kv.clone(), clock.clone());

        let mut engine = SyncEngine::new(remote, fetcher, state)
            .with_clock(clock.clone())
            .with_guard(guard);
        if let Some(cipher) = cipher {
            engine = engine.with_cipher(cipher);
        }

        Self {
            source,
            clock,
            kv,
            engine,
        }
    }

    /// Records a visit at the current clock time, then advances the clock.
    pub fn visit(&self, id: &str, url: &str) -> i64 {
        let t = self.clock.advance(1_000);
        self.source.insert(RawHistoryItem::new(url, t).with_id(id).with_title(url));
        self.clock.advance(1_000);
        t
    }
}

/// In-memory remote shared between devices.
pub fn shared_remote(name: &str) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(name))
}

/// Directory-backed remote that lives as long as the returned `TempDir`.
pub fn temp_remote() -> (Arc<FileSystemStore>, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(FileSystemStore::new(dir.path().join("remote")));
    (store, dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_items_are_distinct() {
        let items = synthetic_items(100, NOW, 10);
        let urls: HashSet<_> = items.iter().map(|i| i.url.clone()).collect();
        assert_eq!(urls.len(), 100);
        assert_eq!(items[0].time(), NOW);
        assert_eq!(items[99].time(), NOW - 990);
    }

    #[tokio::test]
    async fn test_instrumented_source_fails_windows() {
        let source = InstrumentedSource::new(synthetic_source(10, NOW, 1_000));
        source.fail_windows_containing(NOW - 5_000);
        assert!(source.search(0, NOW + 1, 100).await.is_ok());
        assert!(source.search(NOW - 6_000, NOW, 100).await.is_err());
        assert_eq!(source.search(NOW - 2_000, NOW + 1, 100).await.unwrap().len(), 3);
        assert_eq!(source.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_flaky_store_counts_down() {
        let store = FlakyStore::new(shared_remote("flaky"));
        store.fail_next_writes(1);
        assert!(store.write("a", Bytes::from("1"), true).await.is_err());
        assert!(store.write("a", Bytes::from("1"), true).await.is_ok());
    }
}
