//! Windowed history fetcher.
//!
//! The source caps every query, so a single `search(0, now)` silently drops
//! everything past the newest `per_call_cap` items. The fetcher walks the time
//! axis backward in adaptive windows instead:
//!
//! - a saturated window is shrunk and re-queried with the same end,
//! - sparse windows grow to cover quiet periods faster,
//! - runs of empty windows grow faster still, and stop the walk once it is
//!   past the oldest known data.
//!
//! Overlapping results are collapsed by `(url, lastVisitTime)`.

use crate::clock::{Clock, SystemClock};
use crate::config::FetchConfig;
use crate::error::{Error, Result};
use crate::format::{normalize, visit_detail};
use crate::source::HistorySource;
use crate::types::{FetchKey, HistoryRecord, VisitDetail, DAY_MS};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters describing one fetch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchStats {
    pub windows_queried: usize,
    pub saturated_windows: usize,
    /// Windows that stayed saturated at the minimum width and were accepted as-is.
    pub truncated_windows: usize,
    pub empty_windows: usize,
    pub failed_windows: usize,
    pub duplicates_dropped: usize,
    pub probe_size: usize,
    /// Oldest time seen by the initial probe, if any.
    pub horizon: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Records sorted newest first.
    pub records: Vec<HistoryRecord>,
    pub stats: FetchStats,
}

pub struct HistoryFetcher {
    source: Arc<dyn HistorySource>,
    clock: Arc<dyn Clock>,
    config: FetchConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl HistoryFetcher {
    pub fn new(source: Arc<dyn HistorySource>) -> Self {
        Self {
            source,
            clock: Arc::new(SystemClock),
            config: FetchConfig::default(),
            cancel: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: FetchConfig) -> Self {
        self.config = config;
        self
    }

    /// Checks `flag` between windows; once set, the fetch returns `Error::Cancelled`.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Fetches the whole retained history, newest first, up to `max_total` records.
    pub async fn fetch_all(&self, max_total: usize) -> Result<Vec<HistoryRecord>> {
        Ok(self.fetch_recent(0, max_total).await?.records)
    }

    /// Fetches the last `days` days of history (`0` means no lower bound).
    pub async fn fetch_recent(&self, days: u32, max_total: usize) -> Result<FetchOutcome> {
        self.config.validate().map_err(Error::InvalidArgument)?;

        let cfg = &self.config;
        let cap = cfg.per_call_cap;
        let now = self.clock.now_ms();
        let floor = if days > 0 {
            (now - days as i64 * DAY_MS).max(0)
        } else {
            0
        };

        let mut stats = FetchStats::default();
        if max_total == 0 || now <= floor {
            return Ok(FetchOutcome {
                records: Vec::new(),
                stats,
            });
        }

        self.check_cancelled()?;
        let mut horizon = floor;
        match self.source.search(floor, now, cap).await {
            Ok(probe) => {
                stats.probe_size = probe.len();
                let saturated = probe.len() >= cap;
                if let Some(oldest) = probe.iter().map(|i| i.time()).min() {
                    stats.horizon = Some(oldest);
                    // A capped probe only bounds the horizon from above.
                    if days == 0 && !saturated {
                        horizon = oldest;
                    }
                } else if days == 0 {
                    // Nothing retained at all; let the empty-run rule end the walk quickly.
                    horizon = now;
                }
                if saturated {
                    debug!(probe = probe.len(), "probe saturated, walking to the floor");
                }
            }
            Err(e) => warn!(error = %e, "history probe failed, walking without a horizon"),
        }

        info!(days, max_total, floor, horizon, "starting windowed history fetch");

        let mut acc: HashMap<FetchKey, HistoryRecord> = HashMap::new();
        let mut window = cfg.initial_window_ms;
        let mut end = now;
        // `empty_run` drives window growth and resets when the window grows;
        // `empty_streak` drives the stop rule and only resets on data.
        let mut empty_run = 0u32;
        let mut empty_streak = 0u32;

        while end > floor && acc.len() < max_total {
            self.check_cancelled()?;

            let start = (end - window).max(floor);
            stats.windows_queried += 1;

            let items = match self.source.search(start, end, cap).await {
                Ok(items) => items,
                Err(e) => {
                    warn!(start, end, error = %e, "history window failed, skipping");
                    stats.failed_windows += 1;
                    end = start;
                    continue;
                }
            };

            let returned = items.len();
            for item in &items {
                if let Some(record) = normalize(item) {
                    if acc.contains_key(&record.fetch_key()) {
                        stats.duplicates_dropped += 1;
                    } else {
                        acc.insert(record.fetch_key(), record);
                    }
                }
            }

            if returned == 0 {
                stats.empty_windows += 1;
                empty_run += 1;
                empty_streak += 1;
                if empty_run >= cfg.empty_run_before_growth && window < cfg.max_empty_window_ms {
                    window = (window * cfg.empty_growth).min(cfg.max_empty_window_ms);
                    empty_run = 0;
                }
                end = start;
                if end < horizon && empty_streak > cfg.empty_run_before_stop {
                    debug!(end, empty_streak, "past horizon with no data, stopping");
                    break;
                }
                continue;
            }

            empty_run = 0;
            empty_streak = 0;

            if returned >= cap {
                stats.saturated_windows += 1;
                if window > cfg.min_window_ms {
                    window = (window / cfg.shrink_factor).max(cfg.min_window_ms);
                    debug!(start, end, window, "window saturated, re-querying narrower");
                    continue;
                }
                warn!(start, end, "window saturated at minimum width, older visits in it are dropped");
                stats.truncated_windows += 1;
            } else if returned < cfg.sparse_threshold && window < cfg.max_sparse_window_ms {
                window = (window * cfg.sparse_growth).min(cfg.max_sparse_window_ms);
            }

            end = start;
        }

        let mut records: Vec<HistoryRecord> = acc.into_values().collect();
        records.sort_by(|a, b| {
            b.last_visit_time
                .cmp(&a.last_visit_time)
                .then_with(|| a.url.cmp(&b.url))
        });
        records.truncate(max_total);

        info!(
            records = records.len(),
            windows = stats.windows_queried,
            failed = stats.failed_windows,
            "history fetch complete"
        );

        Ok(FetchOutcome { records, stats })
    }

    /// Single capped query for everything visited at or after `since`.
    pub async fn fetch_incremental(&self, since: i64) -> Result<Vec<HistoryRecord>> {
        let now = self.clock.now_ms();
        // Half-open range; include visits stamped exactly at `now`.
        let items = self
            .source
            .search(since.max(0), now.saturating_add(1), self.config.per_call_cap)
            .await?;
        let records: Vec<HistoryRecord> = items.iter().filter_map(normalize).collect();
        debug!(since, count = records.len(), "incremental fetch");
        Ok(records)
    }

    pub async fn visit_details(&self, url: &str) -> Result<Vec<VisitDetail>> {
        if url.is_empty() {
            return Err(Error::InvalidArgument("url must not be empty".to_string()));
        }
        let visits = self.source.get_visits(url).await?;
        Ok(visits.iter().map(visit_detail).collect())
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::SeqCst) => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }
}
