/// Sync engine coordinating uploads, downloads and merges against one remote
/// target.
///
/// Every operation holds a [`SingleFlight`] permit for the target while it
/// runs. The public operations report an [`OperationResult`]; the `run_*`
/// variants return typed outcomes for programmatic callers such as the
/// scheduler.

use bytes::Bytes;
use histsync_core::config::FULL_FETCH_MAX_TOTAL;
use histsync_core::{Clock, Error, HistoryFetcher, HistoryRecord, OperationResult, Result, SystemClock};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cipher::{Cipher, NoCipher};
use crate::codec::{decode_records, encode_records};
use crate::conflict::{resolve_conflicts_detailed, ConflictStrategy};
use crate::guard::SingleFlight;
use crate::reconcile::merge_increment;
use crate::state::SyncStateStore;
use crate::store::{increment_name, increment_timestamp, RemoteStore, SNAPSHOT_NAME};
use crate::{EndpointId, SyncStats};

/// Attempts at finding a free increment name before giving up.
const MAX_NAME_ATTEMPTS: usize = 1000;

/// Message reported when another operation holds the target.
pub const IN_PROGRESS_MESSAGE: &str = "sync already in progress";

/// Sync engine state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// Nothing running
    Idle,
    /// Reading local history
    Fetching,
    /// Writing to the remote
    Uploading,
    /// Reading from the remote
    Downloading,
    /// Folding increments or resolving conflicts
    Merging,
    /// Last operation succeeded
    Completed,
    /// Last operation failed
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncOperation {
    UploadFull,
    DownloadFull,
    UploadIncremental,
    DownloadAndMerge,
    Reconcile,
    TestConnection,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UploadFull => "full upload",
            Self::DownloadFull => "full download",
            Self::UploadIncremental => "incremental upload",
            Self::DownloadAndMerge => "download and merge",
            Self::Reconcile => "reconciliation",
            Self::TestConnection => "connection test",
        };
        f.write_str(name)
    }
}

/// Sync events that can be observed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncEvent {
    /// Operation started
    Started {
        operation: SyncOperation,
        target: EndpointId,
    },
    /// State changed
    StateChanged {
        old_state: SyncState,
        new_state: SyncState,
    },
    /// An object was written to the remote
    Uploaded { object: String, records: usize },
    /// An increment was folded into the snapshot
    IncrementMerged { object: String, records: usize },
    /// An increment could not be read or decoded and was left in place
    IncrementSkipped { object: String, reason: String },
    /// Records were queued for the next incremental upload
    Queued { records: usize },
    /// Full-copy conflicts were resolved
    ConflictsResolved { count: usize },
    /// Operation completed
    Completed { operation: SyncOperation },
    /// Operation failed
    Failed {
        operation: SyncOperation,
        error: String,
    },
}

/// Outcome of an incremental upload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncrementalOutcome {
    pub uploaded: usize,
    /// Increment written, `None` when there was nothing to upload.
    pub object: Option<String>,
    /// The batch was the pending retry queue rather than a fresh delta.
    pub from_pending: bool,
}

/// Outcome of a download-and-merge run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub total: usize,
    pub merged_increments: Vec<String>,
    pub skipped_increments: Vec<String>,
    /// Merged but left on the remote because an older increment was skipped
    /// or could not be deleted.
    pub retained_increments: Vec<String>,
}

/// Outcome of a full-copy reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub total: usize,
    pub conflicts: usize,
    pub local_kept: usize,
    pub remote_only: usize,
}

/// Local view of the sync bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub target: EndpointId,
    pub state: SyncState,
    pub last_sync_time: i64,
    pub pending_count: usize,
    pub cached_count: usize,
    pub in_progress: bool,
}

/// Main sync engine
pub struct SyncEngine {
    /// Remote target
    store: Arc<dyn RemoteStore>,
    target: EndpointId,
    /// Local history
    fetcher: Arc<HistoryFetcher>,
    /// Persistent bookkeeping
    state_store: SyncStateStore,
    cipher: Arc<dyn Cipher>,
    clock: Arc<dyn Clock>,
    guard: SingleFlight,
    /// Current state
    state: Arc<RwLock<SyncState>>,
    stats: Arc<RwLock<SyncStats>>,
    /// Event channel sender
    event_tx: mpsc::UnboundedSender<SyncEvent>,
    /// Event channel receiver
    event_rx: Option<mpsc::UnboundedReceiver<SyncEvent>>,
}

impl SyncEngine {
    /// Create a new sync engine. Payloads are stored unencrypted until a
    /// cipher is supplied with [`SyncEngine::with_cipher`].
    pub fn new(
        store: Arc<dyn RemoteStore>,
        fetcher: Arc<HistoryFetcher>,
        state_store: SyncStateStore,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let target = store.target_id();

        Self {
            store,
            target,
            fetcher,
            state_store,
            cipher: Arc::new(NoCipher),
            clock: Arc::new(SystemClock),
            guard: SingleFlight::new(),
            state: Arc::new(RwLock::new(SyncState::Idle)),
            stats: Arc::new(RwLock::new(SyncStats::default())),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = cipher;
        self
    }

    /// Clock used for increment names. Should match the state store's clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share a guard with other engines so they exclude each other per target.
    pub fn with_guard(mut self, guard: SingleFlight) -> Self {
        self.guard = guard;
        self
    }

    /// Take the event receiver. Returns `None` after the first call.
    pub fn subscribe(&mut self) -> Option<mpsc::UnboundedReceiver<SyncEvent>> {
        self.event_rx.take()
    }

    pub fn target(&self) -> &EndpointId {
        &self.target
    }

    pub fn state(&self) -> SyncState {
        self.state.read().clone()
    }

    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    pub fn state_store(&self) -> &SyncStateStore {
        &self.state_store
    }

    pub fn fetcher(&self) -> &HistoryFetcher {
        &self.fetcher
    }

    /// True while an operation holds this engine's target.
    pub fn is_busy(&self) -> bool {
        self.guard.is_busy(&self.target)
    }

    // ----- reporting operations -----

    /// Upload a full snapshot, fetching all local history when `records` is `None`.
    pub async fn upload_full(&self, records: Option<Vec<HistoryRecord>>) -> OperationResult {
        match self.run_upload_full(records).await {
            Ok(count) => OperationResult::ok(format!("uploaded {} records", count)).with_count(count),
            Err(e) => Self::failure(SyncOperation::UploadFull, &e),
        }
    }

    /// Download the snapshot and cache it locally.
    pub async fn download_full(&self) -> OperationResult {
        match self.run_download_full().await {
            Ok(records) => OperationResult::ok(format!("downloaded {} records", records.len()))
                .with_count(records.len())
                .with_data(records),
            Err(Error::RemoteNotFound(_)) => {
                OperationResult::failed("no remote data").with_data(Vec::new())
            }
            Err(e) => Self::failure(SyncOperation::DownloadFull, &e).with_data(Vec::new()),
        }
    }

    /// Upload everything visited since the last sync as a new increment.
    pub async fn upload_incremental(&self) -> OperationResult {
        match self.run_upload_incremental().await {
            Ok(outcome) if outcome.object.is_none() => {
                OperationResult::ok("no new history to upload").with_count(0)
            }
            Ok(outcome) => {
                let source = if outcome.from_pending { " (retried)" } else { "" };
                OperationResult::ok(format!("uploaded {} records{}", outcome.uploaded, source))
                    .with_count(outcome.uploaded)
            }
            Err(e) => Self::failure(SyncOperation::UploadIncremental, &e),
        }
    }

    /// Fold all remote increments into the snapshot and cache the result.
    pub async fn download_and_merge(&self) -> OperationResult {
        match self.run_download_and_merge().await {
            Ok(outcome) => {
                let mut message = format!(
                    "merged {} increments, {} records total",
                    outcome.merged_increments.len(),
                    outcome.total
                );
                if !outcome.skipped_increments.is_empty() {
                    message.push_str(&format!(
                        ", {} increments skipped",
                        outcome.skipped_increments.len()
                    ));
                }
                OperationResult::ok(message).with_count(outcome.total)
            }
            Err(e) => Self::failure(SyncOperation::DownloadAndMerge, &e),
        }
    }

    /// Combine local history with the remote snapshot using `strategy`.
    pub async fn reconcile_with_remote(&self, strategy: ConflictStrategy) -> OperationResult {
        match self.run_reconcile(strategy).await {
            Ok(outcome) => OperationResult::ok(format!(
                "reconciled {} records ({} conflicts, strategy {})",
                outcome.total, outcome.conflicts, strategy
            ))
            .with_count(outcome.total),
            Err(e) => Self::failure(SyncOperation::Reconcile, &e),
        }
    }

    pub async fn test_connection(&self) -> OperationResult {
        match self.run_test_connection().await {
            Ok(entries) => {
                OperationResult::ok(format!("connection ok, {} entries", entries)).with_count(entries)
            }
            Err(e) => Self::failure(SyncOperation::TestConnection, &e),
        }
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus {
            target: self.target.clone(),
            state: self.state(),
            last_sync_time: self.state_store.last_sync().await?,
            pending_count: self.state_store.pending_count().await?,
            cached_count: self.state_store.cached_history().await?.len(),
            in_progress: self.is_busy(),
        })
    }

    // ----- typed operations -----

    pub async fn run_upload_full(&self, records: Option<Vec<HistoryRecord>>) -> Result<usize> {
        self.guarded(SyncOperation::UploadFull, async {
            let records = match records {
                Some(records) => records,
                None => {
                    self.set_state(SyncState::Fetching);
                    self.fetcher.fetch_all(FULL_FETCH_MAX_TOTAL).await?
                }
            };

            self.set_state(SyncState::Uploading);
            let data = encode_records(&records, self.cipher.as_ref())?;
            self.put(SNAPSHOT_NAME, data, true, records.len()).await?;
            self.state_store.mark_synced().await?;

            info!(count = records.len(), target = %self.target, "uploaded full snapshot");
            Ok(records.len())
        })
        .await
    }

    pub async fn run_download_full(&self) -> Result<Vec<HistoryRecord>> {
        self.guarded(SyncOperation::DownloadFull, async {
            self.set_state(SyncState::Downloading);
            let records = self
                .read_snapshot()
                .await?
                .ok_or_else(|| Error::RemoteNotFound(SNAPSHOT_NAME.to_string()))?;

            self.state_store.save_cache(&records).await?;
            self.stats.write().items_received += records.len() as u64;
            info!(count = records.len(), "downloaded full snapshot");
            Ok(records)
        })
        .await
    }

    pub async fn run_upload_incremental(&self) -> Result<IncrementalOutcome> {
        self.guarded(SyncOperation::UploadIncremental, async {
            let since = self.state_store.last_sync().await?;
            let pending = self.state_store.pending().await?;

            let from_pending = !pending.is_empty();
            let batch = if from_pending {
                debug!(count = pending.len(), "retrying pending records");
                pending
            } else {
                self.set_state(SyncState::Fetching);
                self.fetcher.fetch_incremental(since).await?
            };

            if batch.is_empty() {
                debug!(since, "nothing to upload");
                return Ok(IncrementalOutcome::default());
            }

            self.set_state(SyncState::Uploading);
            match self.write_increment(&batch).await {
                Ok(object) => {
                    self.state_store.mark_synced().await?;
                    self.state_store.clear_pending().await?;
                    info!(count = batch.len(), object = %object, "uploaded increment");
                    Ok(IncrementalOutcome {
                        uploaded: batch.len(),
                        object: Some(object),
                        from_pending,
                    })
                }
                Err(e) => {
                    if !from_pending && !e.is_fatal_for_schedule() {
                        self.queue_for_retry(since, batch).await;
                    }
                    Err(e)
                }
            }
        })
        .await
    }

    pub async fn run_download_and_merge(&self) -> Result<MergeOutcome> {
        self.guarded(SyncOperation::DownloadAndMerge, async {
            self.set_state(SyncState::Downloading);
            let mut running = self.read_snapshot().await?.unwrap_or_default();

            let mut increments: Vec<(i64, String)> = self
                .store
                .list_directory("")
                .await?
                .into_iter()
                .filter(|entry| entry.is_file())
                .filter_map(|entry| increment_timestamp(&entry.name).map(|ts| (ts, entry.name)))
                .collect();
            increments.sort();

            self.set_state(SyncState::Merging);
            let mut outcome = MergeOutcome::default();
            // Ascending name order; `None` marks an increment that was skipped.
            let mut applied: Vec<Option<String>> = Vec::with_capacity(increments.len());
            for (_, name) in increments {
                match self.read_records(&name).await {
                    Ok(records) => {
                        let count = records.len();
                        merge_increment(&mut running, records);
                        self.emit_event(SyncEvent::IncrementMerged {
                            object: name.clone(),
                            records: count,
                        });
                        outcome.merged_increments.push(name.clone());
                        applied.push(Some(name));
                    }
                    Err(e) => {
                        warn!(object = %name, error = %e, "skipping unreadable increment");
                        self.emit_event(SyncEvent::IncrementSkipped {
                            object: name.clone(),
                            reason: e.to_string(),
                        });
                        outcome.skipped_increments.push(name);
                        applied.push(None);
                    }
                }
            }

            if !outcome.merged_increments.is_empty() {
                self.set_state(SyncState::Uploading);
                let data = encode_records(&running, self.cipher.as_ref())?;
                self.put(SNAPSHOT_NAME, data, true, running.len()).await?;

                // Only after the snapshot holds their contents. Deletion stops at
                // the first skipped increment or failed delete, so whatever stays
                // on the remote is a newest suffix and replays in order.
                let mut deleting = true;
                for entry in applied {
                    match entry {
                        Some(name) if deleting => {
                            if let Err(e) = self.store.delete(&name).await {
                                warn!(object = %name, error = %e, "failed to delete merged increment, keeping newer ones");
                                deleting = false;
                                outcome.retained_increments.push(name);
                            }
                        }
                        Some(name) => outcome.retained_increments.push(name),
                        None => deleting = false,
                    }
                }
            }

            {
                let mut stats = self.stats.write();
                stats.increments_merged += outcome.merged_increments.len() as u64;
                stats.increments_skipped += outcome.skipped_increments.len() as u64;
            }

            self.state_store.save_cache(&running).await?;
            self.state_store.mark_synced().await?;
            outcome.total = running.len();

            info!(
                total = outcome.total,
                merged = outcome.merged_increments.len(),
                skipped = outcome.skipped_increments.len(),
                "merged remote increments"
            );
            Ok(outcome)
        })
        .await
    }

    pub async fn run_reconcile(&self, strategy: ConflictStrategy) -> Result<ReconcileOutcome> {
        self.guarded(SyncOperation::Reconcile, async {
            self.set_state(SyncState::Fetching);
            let local = self.fetcher.fetch_all(FULL_FETCH_MAX_TOTAL).await?;

            self.set_state(SyncState::Downloading);
            let remote = self.read_snapshot().await?.unwrap_or_default();

            self.set_state(SyncState::Merging);
            let report = resolve_conflicts_detailed(&local, &remote, strategy);
            let local_kept = report.local_kept();
            self.emit_event(SyncEvent::ConflictsResolved {
                count: report.conflicts.len(),
            });
            {
                let mut stats = self.stats.write();
                stats.conflicts_detected += report.conflicts.len() as u64;
                stats.conflicts_resolved_local += local_kept as u64;
            }

            self.set_state(SyncState::Uploading);
            let data = encode_records(&report.merged, self.cipher.as_ref())?;
            self.put(SNAPSHOT_NAME, data, true, report.merged.len()).await?;
            self.state_store.save_cache(&report.merged).await?;
            self.state_store.mark_synced().await?;

            info!(
                total = report.merged.len(),
                conflicts = report.conflicts.len(),
                %strategy,
                "reconciled with remote snapshot"
            );
            Ok(ReconcileOutcome {
                total: report.merged.len(),
                conflicts: report.conflicts.len(),
                local_kept,
                remote_only: report.remote_only,
            })
        })
        .await
    }

    /// Lists the remote root; returns the number of entries.
    pub async fn run_test_connection(&self) -> Result<usize> {
        self.guarded(SyncOperation::TestConnection, async {
            let entries = self.store.list_directory("").await?;
            Ok(entries.len())
        })
        .await
    }

    // ----- internals -----

    async fn guarded<T>(
        &self,
        operation: SyncOperation,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let _permit = self.guard.try_acquire(&self.target)?;
        let started = Instant::now();
        self.emit_event(SyncEvent::Started {
            operation,
            target: self.target.clone(),
        });

        let result = work.await;

        let elapsed = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => {
                self.set_state(SyncState::Completed);
                let mut stats = self.stats.write();
                stats.record_run(true, elapsed);
                stats.last_sync_time = Some(self.clock.now_ms());
                drop(stats);
                self.emit_event(SyncEvent::Completed { operation });
            }
            Err(e) => {
                warn!(%operation, error = %e, code = e.code(), "sync operation failed");
                self.set_state(SyncState::Failed(e.to_string()));
                self.stats.write().record_run(false, elapsed);
                self.emit_event(SyncEvent::Failed {
                    operation,
                    error: e.to_string(),
                });
            }
        }
        result
    }

    fn failure(operation: SyncOperation, error: &Error) -> OperationResult {
        match error {
            Error::SyncInProgress(_) => OperationResult::failed(IN_PROGRESS_MESSAGE),
            e => OperationResult::failed(format!("{} failed: {}", operation, e)),
        }
    }

    /// Writes `data` and accounts for it.
    async fn put(&self, name: &str, data: Bytes, overwrite: bool, records: usize) -> Result<()> {
        let size = data.len() as u64;
        self.store.write(name, data, overwrite).await?;
        {
            let mut stats = self.stats.write();
            stats.bytes_sent += size;
            stats.items_sent += records as u64;
        }
        self.emit_event(SyncEvent::Uploaded {
            object: name.to_string(),
            records,
        });
        Ok(())
    }

    /// Writes `batch` under a fresh increment name, bumping the timestamp past
    /// names that are already taken.
    async fn write_increment(&self, batch: &[HistoryRecord]) -> Result<String> {
        let data = encode_records(batch, self.cipher.as_ref())?;
        let mut timestamp = self.clock.now_ms();

        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = increment_name(timestamp);
            match self.put(&name, data.clone(), false, batch.len()).await {
                Ok(()) => return Ok(name),
                Err(Error::AlreadyExists(_)) => {
                    debug!(object = %name, "increment name taken");
                    timestamp += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::Internal(format!(
            "no free increment name after {} attempts",
            MAX_NAME_ATTEMPTS
        )))
    }

    /// Queues a failed fresh delta. The delta is re-fetched so visits made
    /// during the failed upload are included.
    async fn queue_for_retry(&self, since: i64, batch: Vec<HistoryRecord>) {
        let records = match self.fetcher.fetch_incremental(since).await {
            Ok(records) if !records.is_empty() => records,
            Ok(_) => batch,
            Err(e) => {
                debug!(error = %e, "re-fetch for retry queue failed, queueing original batch");
                batch
            }
        };
        let count = records.len();
        match self.state_store.append_pending(&records).await {
            Ok(()) => self.emit_event(SyncEvent::Queued { records: count }),
            Err(e) => warn!(error = %e, count, "failed to queue records for retry"),
        }
    }

    async fn read_snapshot(&self) -> Result<Option<Vec<HistoryRecord>>> {
        if !self.store.exists(SNAPSHOT_NAME).await? {
            return Ok(None);
        }
        self.read_records(SNAPSHOT_NAME).await.map(Some)
    }

    async fn read_records(&self, name: &str) -> Result<Vec<HistoryRecord>> {
        let data = self.store.read(name).await?;
        self.stats.write().bytes_received += data.len() as u64;
        decode_records(&data, self.cipher.as_ref()).into_records(name)
    }

    fn set_state(&self, new_state: SyncState) {
        let old_state = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, new_state.clone())
        };
        if old_state != new_state {
            self.emit_event(SyncEvent::StateChanged {
                old_state,
                new_state,
            });
        }
    }

    fn emit_event(&self, event: SyncEvent) {
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::AesGcmCipher;
    use crate::kv::MemoryKvStore;
    use crate::store::MemoryStore;
    use histsync_core::{ManualClock, MemoryHistorySource, RawHistoryItem, DAY_MS};

    const NOW: i64 = 1_700_000_000_000;

    struct Fixture {
        engine: SyncEngine,
        source: Arc<MemoryHistorySource>,
        remote: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(NOW));
        let source = Arc::new(MemoryHistorySource::new());
        let remote = Arc::new(MemoryStore::new("engine-test"));
        let fetcher = Arc::new(HistoryFetcher::new(source.clone()).with_clock(clock.clone()));
        let state = SyncStateStore::new(Arc::new(MemoryKvStore::new()), clock.clone());
        let engine = SyncEngine::new(remote.clone(), fetcher, state).with_clock(clock.clone());
        Fixture {
            engine,
            source,
            remote,
            clock,
        }
    }

    fn record(id: &str, url: &str, t: i64) -> HistoryRecord {
        HistoryRecord {
            id: Some(id.to_string()),
            url: url.to_string(),
            title: "t".to_string(),
            last_visit_time: t,
            visit_count: 1,
            formatted_time: String::new(),
        }
    }

    #[tokio::test]
    async fn test_upload_full_then_download() {
        let f = fixture();
        f.source.insert(RawHistoryItem::new("https://a.com", NOW - DAY_MS).with_id("1"));
        f.source.insert(RawHistoryItem::new("https://b.com", NOW - 2 * DAY_MS).with_id("2"));

        let result = f.engine.upload_full(None).await;
        assert!(result.success, "{}", result.message);
        assert_eq!(result.count, Some(2));
        assert!(f.remote.get(SNAPSHOT_NAME).is_some());
        assert_eq!(f.engine.state_store().last_sync().await.unwrap(), NOW);

        let result = f.engine.download_full().await;
        assert!(result.success);
        assert_eq!(result.data.unwrap().len(), 2);
        assert_eq!(f.engine.state_store().cached_history().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_download_full_without_snapshot() {
        let f = fixture();
        let result = f.engine.download_full().await;
        assert!(!result.success);
        assert_eq!(result.message, "no remote data");
        assert_eq!(result.data, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_empty_delta_makes_no_network_call() {
        let f = fixture();
        let result = f.engine.upload_incremental().await;
        assert!(result.success);
        assert_eq!(result.count, Some(0));
        assert_eq!(f.remote.write_count(), 0);
    }

    #[tokio::test]
    async fn test_incremental_bumps_taken_name() {
        let f = fixture();
        f.source.insert(RawHistoryItem::new("https://a.com", NOW - 10).with_id("1"));
        f.remote.put(increment_name(NOW), "[]");

        let outcome = f.engine.run_upload_incremental().await.unwrap();
        assert_eq!(outcome.object, Some(increment_name(NOW + 1)));
        assert_eq!(outcome.uploaded, 1);
        assert_eq!(f.remote.get(&increment_name(NOW)).unwrap(), Bytes::from("[]"));
    }

    #[tokio::test]
    async fn test_merge_applies_increments_in_order_and_deletes_them() {
        let f = fixture();
        let cipher = NoCipher;
        f.remote.put(
            SNAPSHOT_NAME,
            encode_records(&[record("1", "https://a", 1)], &cipher).unwrap(),
        );
        f.remote.put(
            increment_name(200),
            encode_records(&[record("1", "https://a-late", 200)], &cipher).unwrap(),
        );
        f.remote.put(
            increment_name(100),
            encode_records(&[record("1", "https://a-early", 100), record("2", "https://b", 100)], &cipher)
                .unwrap(),
        );
        f.remote.put(increment_name(300), "not json at all");

        let outcome = f.engine.run_download_and_merge().await.unwrap();
        assert_eq!(outcome.merged_increments, vec![increment_name(100), increment_name(200)]);
        assert_eq!(outcome.skipped_increments, vec![increment_name(300)]);
        assert_eq!(outcome.total, 2);

        let names = f.remote.object_names();
        assert!(!names.contains(&increment_name(100)));
        assert!(!names.contains(&increment_name(200)));
        assert!(names.contains(&increment_name(300)));

        let snapshot = decode_records(&f.remote.get(SNAPSHOT_NAME).unwrap(), &cipher)
            .into_records(SNAPSHOT_NAME)
            .unwrap();
        let urls: Vec<&str> = snapshot.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://b", "https://a-late"]);
        assert_eq!(f.engine.state_store().cached_history().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_merge_keeps_increments_newer_than_a_skipped_one() {
        let f = fixture();
        let cipher = NoCipher;
        f.remote.put(
            increment_name(100),
            encode_records(&[record("1", "https://a", 100)], &cipher).unwrap(),
        );
        f.remote.put(increment_name(200), "not json at all");
        f.remote.put(
            increment_name(300),
            encode_records(&[record("2", "https://b", 300)], &cipher).unwrap(),
        );

        let outcome = f.engine.run_download_and_merge().await.unwrap();
        assert_eq!(outcome.merged_increments, vec![increment_name(100), increment_name(300)]);
        assert_eq!(outcome.skipped_increments, vec![increment_name(200)]);
        assert_eq!(outcome.retained_increments, vec![increment_name(300)]);
        assert_eq!(outcome.total, 2);

        let names = f.remote.object_names();
        assert!(!names.contains(&increment_name(100)));
        assert!(names.contains(&increment_name(200)));
        assert!(names.contains(&increment_name(300)));
    }

    #[tokio::test]
    async fn test_busy_target_rejects_without_touching_remote() {
        let f = fixture();
        let _permit = f.engine.guard.try_acquire(f.engine.target()).unwrap();

        let result = f.engine.upload_full(Some(vec![record("1", "https://a", 1)])).await;
        assert!(!result.success);
        assert_eq!(result.message, IN_PROGRESS_MESSAGE);
        assert_eq!(f.remote.write_count(), 0);
        assert_eq!(f.engine.stats().total_syncs, 0);
    }

    #[tokio::test]
    async fn test_encrypted_snapshot_needs_the_key() {
        let f = fixture();
        let engine = f.engine.with_cipher(Arc::new(AesGcmCipher::new("passphrase-1")));
        engine
            .run_upload_full(Some(vec![record("1", "https://a", 1)]))
            .await
            .unwrap();
        let raw = f.remote.get(SNAPSHOT_NAME).unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("https://a"));
        assert!(decode_records(&raw, &NoCipher).is_failed());
        assert_eq!(engine.run_download_full().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_writes_merged_snapshot() {
        let f = fixture();
        f.source.insert(
            RawHistoryItem::new("https://a", NOW - 100)
                .with_id("1")
                .with_visit_count(10),
        );
        f.remote.put(
            SNAPSHOT_NAME,
            encode_records(
                &[
                    HistoryRecord { visit_count: 3, ..record("1", "https://a", NOW - 50) },
                    record("2", "https://b", 5),
                ],
                &NoCipher,
            )
            .unwrap(),
        );

        let outcome = f.engine.run_reconcile(ConflictStrategy::Smart).await.unwrap();
        assert_eq!(outcome.total, 2);
        assert_eq!(outcome.conflicts, 1);
        assert_eq!(outcome.local_kept, 1);
        assert_eq!(outcome.remote_only, 1);
        assert_eq!(f.engine.stats().conflicts_detected, 1);
    }

    #[tokio::test]
    async fn test_events_and_status() {
        let mut f = fixture();
        let mut events = f.engine.subscribe().unwrap();
        assert!(f.engine.subscribe().is_none());

        f.clock.advance(5);
        assert!(f.engine.test_connection().await.success);

        let first = events.recv().await.unwrap();
        assert!(matches!(first, SyncEvent::Started { operation: SyncOperation::TestConnection, .. }));

        let status = f.engine.status().await.unwrap();
        assert_eq!(status.state, SyncState::Completed);
        assert!(!status.in_progress);
        assert_eq!(status.last_sync_time, 0);
        assert_eq!(f.engine.stats().successful_syncs, 1);
    }
}
