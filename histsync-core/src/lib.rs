//! Core types, the windowed history fetcher and analytics.
//!
//! Everything in this crate is independent of the remote store; the sync
//! engine lives in `histsync-sync`.

pub mod analytics;
pub mod clock;
pub mod config;
pub mod error;
pub mod export;
pub mod fetcher;
pub mod filter;
pub mod format;
pub mod retry;
pub mod source;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::FetchConfig;
pub use error::{Error, Result};
pub use fetcher::{FetchOutcome, FetchStats, HistoryFetcher};
pub use source::{HistorySource, MemoryHistorySource};
pub use types::*;
