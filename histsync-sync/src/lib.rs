//! Synchronization of browser history with a remote object store.
//!
//! Uploads go out as a full snapshot (`browser-history-total.json`) or as
//! write-once increments (`browser-history-increment-<ms>.json`). Downloads
//! fold increments into the snapshot and clean them up afterwards. Payloads are
//! optionally AES-256-GCM encrypted.

pub mod cipher;
pub mod codec;
pub mod conflict;
pub mod engine;
pub mod guard;
pub mod kv;
pub mod reconcile;
pub mod scheduler;
pub mod settings;
pub mod state;
pub mod store;

pub use cipher::{AesGcmCipher, Cipher, NoCipher};
pub use codec::{decode_records, encode_records, Decoded};
pub use conflict::{resolve_conflicts, Conflict, ConflictResolution, ConflictStrategy};
pub use engine::{SyncEngine, SyncEvent, SyncOperation, SyncState, SyncStatus};
pub use guard::SingleFlight;
pub use kv::{JsonFileKvStore, KeyValueStore, KeyValueStoreExt, MemoryKvStore};
pub use reconcile::{deduplicate, merge_increment, DedupStrategy};
pub use scheduler::SyncScheduler;
pub use settings::SyncSettings;
pub use state::SyncStateStore;
pub use store::{RemoteEndpoint, RemoteEntry, RemoteStore};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a remote target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub String);

impl EndpointId {
    /// Create a new random endpoint ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sync statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub conflicts_detected: u64,
    pub conflicts_resolved_local: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub items_sent: u64,
    pub items_received: u64,
    pub increments_merged: u64,
    pub increments_skipped: u64,
    pub last_sync_time: Option<i64>,
    pub avg_sync_duration_ms: u64,
}

impl SyncStats {
    pub(crate) fn record_run(&mut self, success: bool, duration_ms: u64) {
        let previous = self.total_syncs;
        self.total_syncs += 1;
        if success {
            self.successful_syncs += 1;
        } else {
            self.failed_syncs += 1;
        }
        self.avg_sync_duration_ms =
            (self.avg_sync_duration_ms * previous + duration_ms) / self.total_syncs;
    }
}
