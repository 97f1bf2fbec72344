//! History source abstraction and an in-memory implementation.

use crate::error::Result;
use crate::types::{RawHistoryItem, RawVisit};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A capped, time-ordered store of visit history.
///
/// `search` returns at most `cap` items with `start <= lastVisitTime < end`,
/// newest first. Sources are free to silently drop anything past the cap; the
/// fetcher is responsible for covering the full range.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn search(&self, start: i64, end: i64, cap: usize) -> Result<Vec<RawHistoryItem>>;

    async fn get_visits(&self, url: &str) -> Result<Vec<RawVisit>>;
}

/// Sorted in-memory source honouring the per-call cap.
#[derive(Debug, Default)]
pub struct MemoryHistorySource {
    // Sorted by time, descending.
    items: RwLock<Vec<RawHistoryItem>>,
    visits: RwLock<HashMap<String, Vec<RawVisit>>>,
    calls: AtomicUsize,
}

impl MemoryHistorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(mut items: Vec<RawHistoryItem>) -> Self {
        items.sort_by(|a, b| b.time().cmp(&a.time()));
        Self {
            items: RwLock::new(items),
            visits: RwLock::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn insert(&self, item: RawHistoryItem) {
        let mut items = self.items.write();
        let pos = items.partition_point(|i| i.time() > item.time());
        items.insert(pos, item);
    }

    pub fn add_visit(&self, url: impl Into<String>, visit: RawVisit) {
        self.visits.write().entry(url.into()).or_default().push(visit);
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Number of `search` calls served so far.
    pub fn search_calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl HistorySource for MemoryHistorySource {
    async fn search(&self, start: i64, end: i64, cap: usize) -> Result<Vec<RawHistoryItem>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if start >= end {
            return Ok(Vec::new());
        }

        let items = self.items.read();
        // First item older than `end`, then first item older than `start`.
        let lo = items.partition_point(|i| i.time() >= end);
        let hi = items.partition_point(|i| i.time() >= start);
        let take = (hi - lo).min(cap);
        Ok(items[lo..lo + take].to_vec())
    }

    async fn get_visits(&self, url: &str) -> Result<Vec<RawVisit>> {
        Ok(self.visits.read().get(url).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> MemoryHistorySource {
        MemoryHistorySource::from_items(
            (0..10)
                .map(|i| RawHistoryItem::new(format!("https://s.com/{}", i), i * 10))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_search_half_open_range_newest_first() {
        let src = source();
        let out = src.search(20, 50, 100).await.unwrap();
        let times: Vec<i64> = out.iter().map(|i| i.time()).collect();
        assert_eq!(times, vec![40, 30, 20]);
    }

    #[tokio::test]
    async fn test_search_honours_cap() {
        let src = source();
        let out = src.search(0, 1_000, 4).await.unwrap();
        let times: Vec<i64> = out.iter().map(|i| i.time()).collect();
        assert_eq!(times, vec![90, 80, 70, 60]);
        assert_eq!(src.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_insert_keeps_order() {
        let src = source();
        src.insert(RawHistoryItem::new("https://s.com/x", 55));
        let out = src.search(50, 60, 10).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].time(), 55);
    }

    #[tokio::test]
    async fn test_empty_range() {
        let src = source();
        assert!(src.search(50, 50, 10).await.unwrap().is_empty());
        assert!(src.get_visits("https://none").await.unwrap().is_empty());
    }
}
