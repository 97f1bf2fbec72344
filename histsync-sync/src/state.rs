//! Persistent sync bookkeeping: last-sync time, the pending retry queue and
//! the local cache of merged history.

use histsync_core::{Clock, HistoryRecord, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::kv::{KeyValueStore, KeyValueStoreExt};

pub const LAST_SYNC_KEY: &str = "lastSyncTimestamp";
pub const PENDING_KEY: &str = "pendingSyncData";
pub const CACHE_KEY: &str = "cachedHistory";

#[derive(Clone)]
pub struct SyncStateStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl SyncStateStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    pub fn kv(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }

    /// Last confirmed sync time in epoch ms, 0 when never synced.
    pub async fn last_sync(&self) -> Result<i64> {
        Ok(self
            .kv
            .get_one(LAST_SYNC_KEY)
            .await?
            .and_then(|v| v.as_i64())
            .unwrap_or(0))
    }

    /// Records "now" as the last confirmed sync and returns it.
    pub async fn mark_synced(&self) -> Result<i64> {
        let now = self.clock.now_ms();
        self.kv.set_one(LAST_SYNC_KEY, Value::from(now)).await?;
        debug!(now, "marked synced");
        Ok(now)
    }

    pub async fn pending(&self) -> Result<Vec<HistoryRecord>> {
        self.read_records(PENDING_KEY).await
    }

    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self.pending().await?.len())
    }

    /// Appends `records` to the pending queue, preserving existing entries.
    pub async fn append_pending(&self, records: &[HistoryRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut pending = self.pending().await?;
        pending.extend_from_slice(records);
        let total = pending.len();
        self.kv
            .set_one(PENDING_KEY, serde_json::to_value(&pending)?)
            .await?;
        debug!(added = records.len(), total, "queued records for retry");
        Ok(())
    }

    pub async fn clear_pending(&self) -> Result<()> {
        self.kv.remove(&[PENDING_KEY]).await
    }

    pub async fn save_cache(&self, records: &[HistoryRecord]) -> Result<()> {
        self.kv
            .set_one(CACHE_KEY, serde_json::to_value(records)?)
            .await
    }

    pub async fn cached_history(&self) -> Result<Vec<HistoryRecord>> {
        self.read_records(CACHE_KEY).await
    }

    /// Forgets the last-sync time, the pending queue and the local cache.
    pub async fn reset(&self) -> Result<()> {
        self.kv.remove(&[LAST_SYNC_KEY, PENDING_KEY, CACHE_KEY]).await?;
        debug!("cleared local sync state");
        Ok(())
    }

    async fn read_records(&self, key: &str) -> Result<Vec<HistoryRecord>> {
        match self.kv.get_one(key).await? {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => match serde_json::from_value(value) {
                Ok(records) => Ok(records),
                Err(e) => {
                    // A damaged queue must not wedge every future sync.
                    warn!(key, error = %e, "ignoring unreadable stored records");
                    Ok(Vec::new())
                }
            },
        }
    }
}
