//! Folding increments into a running record set, and deduplication.

use histsync_core::{HistoryRecord, Identity};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Applies one increment: running entries sharing an identity with any
/// incoming record are dropped, then the incoming records are appended in
/// their original order.
pub fn merge_increment(running: &mut Vec<HistoryRecord>, incoming: Vec<HistoryRecord>) {
    if incoming.is_empty() {
        return;
    }
    let replaced: HashSet<Identity> = incoming.iter().map(HistoryRecord::identity).collect();
    running.retain(|r| !replaced.contains(&r.identity()));
    running.extend(incoming);
}

/// Key used by [`deduplicate`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupStrategy {
    #[default]
    Url,
    /// Title, or url when the title is empty
    Title,
    UrlAndTitle,
}

impl DedupStrategy {
    fn key(&self, record: &HistoryRecord) -> String {
        match self {
            DedupStrategy::Url => record.url.clone(),
            DedupStrategy::Title => {
                if record.title.is_empty() {
                    record.url.clone()
                } else {
                    record.title.clone()
                }
            }
            DedupStrategy::UrlAndTitle => format!("{}|{}", record.url, record.title),
        }
    }
}

/// Keeps one record per key, the one with the latest visit time. Output order
/// is the order in which each key first appears.
pub fn deduplicate(records: &[HistoryRecord], strategy: DedupStrategy) -> Vec<HistoryRecord> {
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(records.len());
    let mut out: Vec<HistoryRecord> = Vec::new();

    for record in records {
        let key = strategy.key(record);
        match slots.get(&key) {
            Some(&slot) => {
                if record.last_visit_time > out[slot].last_visit_time {
                    out[slot] = record.clone();
                }
            }
            None => {
                slots.insert(key, out.len());
                out.push(record.clone());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: Option<&str>, url: &str, title: &str, t: i64) -> HistoryRecord {
        HistoryRecord {
            id: id.map(str::to_string),
            url: url.to_string(),
            title: title.to_string(),
            last_visit_time: t,
            visit_count: 1,
            formatted_time: String::new(),
        }
    }

    #[test]
    fn test_merge_replaces_and_appends() {
        let mut running = vec![
            rec(Some("1"), "https://a", "A", 1),
            rec(Some("2"), "https://b", "B", 2),
            rec(None, "https://c", "C", 3),
        ];
        merge_increment(
            &mut running,
            vec![rec(Some("1"), "https://a2", "A2", 10), rec(None, "https://c", "C2", 30)],
        );
        let urls: Vec<&str> = running.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://b", "https://a2", "https://c"]);
        assert_eq!(running[2].title, "C2");
    }

    #[test]
    fn test_merge_same_increment_twice_is_stable() {
        let inc = vec![rec(Some("9"), "https://z", "Z", 5)];
        let mut running = vec![rec(Some("1"), "https://a", "A", 1)];
        merge_increment(&mut running, inc.clone());
        let once = running.clone();
        merge_increment(&mut running, inc);
        assert_eq!(running, once);
    }

    #[test]
    fn test_dedup_keeps_latest_in_first_seen_order() {
        let records = vec![
            rec(None, "https://a", "A", 1),
            rec(None, "https://b", "B", 2),
            rec(None, "https://a", "A", 7),
            rec(None, "https://a", "A", 3),
        ];
        let out = deduplicate(&records, DedupStrategy::Url);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].url, "https://a");
        assert_eq!(out[0].last_visit_time, 7);
        assert_eq!(out[1].url, "https://b");
    }

    #[test]
    fn test_dedup_by_title_falls_back_to_url() {
        let records = vec![
            rec(None, "https://a", "", 1),
            rec(None, "https://b", "", 2),
            rec(None, "https://c", "Same", 3),
            rec(None, "https://d", "Same", 4),
        ];
        let out = deduplicate(&records, DedupStrategy::Title);
        assert_eq!(out.len(), 3);
        assert_eq!(out[2].url, "https://d");

        let out = deduplicate(&records, DedupStrategy::UrlAndTitle);
        assert_eq!(out.len(), 4);
    }
}
