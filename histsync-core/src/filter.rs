//! Search, attribute filters and retention helpers over record sets.

use crate::analytics::{extract_domain, DateRange};
use crate::error::{Error, Result};
use crate::types::{HistoryRecord, DAY_MS};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    Title,
    Url,
    Domain,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub fields: Vec<SearchField>,
    pub exact_match: bool,
    pub case_sensitive: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            fields: vec![SearchField::Title, SearchField::Url, SearchField::Domain],
            exact_match: false,
            case_sensitive: false,
        }
    }
}

impl SearchOptions {
    pub fn exact(mut self) -> Self {
        self.exact_match = true;
        self
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }

    pub fn in_fields(mut self, fields: &[SearchField]) -> Self {
        self.fields = fields.to_vec();
        self
    }
}

/// Keyword search. A blank keyword matches everything.
pub fn search(records: &[HistoryRecord], keyword: &str, options: &SearchOptions) -> Vec<HistoryRecord> {
    if keyword.trim().is_empty() {
        return records.to_vec();
    }

    let fold = |s: &str| {
        if options.case_sensitive {
            s.to_string()
        } else {
            s.to_lowercase()
        }
    };
    let term = fold(keyword);
    let matches = |haystack: String| {
        if options.exact_match {
            haystack == term
        } else {
            haystack.contains(&term)
        }
    };

    records
        .iter()
        .filter(|record| {
            options.fields.iter().any(|field| match field {
                SearchField::Title => matches(fold(&record.title)),
                SearchField::Url => matches(fold(&record.url)),
                SearchField::Domain => matches(fold(&extract_domain(&record.url))),
            })
        })
        .cloned()
        .collect()
}

/// Attribute filter. Unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Inclusive, compared against the UTC calendar date of the visit.
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub domains: Vec<String>,
    pub exclude_domains: Vec<String>,
    pub min_visit_count: Option<u32>,
    pub max_visit_count: Option<u32>,
}

impl HistoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `YYYY-MM-DD` bounds.
    pub fn with_date_range(mut self, start: Option<&str>, end: Option<&str>) -> Result<Self> {
        self.start_date = start.map(parse_date).transpose()?;
        self.end_date = end.map(parse_date).transpose()?;
        Ok(self)
    }

    pub fn with_domains(mut self, domains: Vec<String>) -> Self {
        self.domains = domains;
        self
    }

    pub fn excluding_domains(mut self, domains: Vec<String>) -> Self {
        self.exclude_domains = domains;
        self
    }

    pub fn with_visit_count_bounds(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.min_visit_count = min;
        self.max_visit_count = max;
        self
    }

    pub fn matches(&self, record: &HistoryRecord) -> bool {
        if self.start_date.is_some() || self.end_date.is_some() {
            let Some(date) = DateTime::<Utc>::from_timestamp_millis(record.last_visit_time)
                .map(|dt| dt.date_naive())
            else {
                return false;
            };
            if self.start_date.is_some_and(|start| date < start) {
                return false;
            }
            if self.end_date.is_some_and(|end| date > end) {
                return false;
            }
        }

        if !self.domains.is_empty() || !self.exclude_domains.is_empty() {
            let domain = extract_domain(&record.url);
            if !self.domains.is_empty() && !self.domains.contains(&domain) {
                return false;
            }
            if self.exclude_domains.contains(&domain) {
                return false;
            }
        }

        if self.min_visit_count.is_some_and(|min| record.visit_count < min) {
            return false;
        }
        if self.max_visit_count.is_some_and(|max| record.visit_count > max) {
            return false;
        }

        true
    }

    pub fn apply(&self, records: &[HistoryRecord]) -> Vec<HistoryRecord> {
        records.iter().filter(|r| self.matches(r)).cloned().collect()
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::InvalidArgument(format!("invalid date '{}': {}", s, e)))
}

/// Records visited within the last `days` days relative to `now_ms`.
pub fn filter_by_days(records: &[HistoryRecord], days: u32, now_ms: i64) -> Vec<HistoryRecord> {
    let cutoff = now_ms - days as i64 * DAY_MS;
    records
        .iter()
        .filter(|r| r.last_visit_time >= cutoff)
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct CleanupResult {
    pub kept: Vec<HistoryRecord>,
    pub removed: Vec<HistoryRecord>,
}

impl CleanupResult {
    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }
}

/// Splits `records` at `now_ms - keep_days`.
pub fn cleanup_old_data(records: Vec<HistoryRecord>, keep_days: u32, now_ms: i64) -> CleanupResult {
    let cutoff = now_ms - keep_days as i64 * DAY_MS;
    let (kept, removed) = records
        .into_iter()
        .partition(|r| r.last_visit_time >= cutoff);
    CleanupResult { kept, removed }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSummary {
    pub total_records: usize,
    pub unique_domains: usize,
    /// Size of the JSON encoding of the set.
    pub size_in_bytes: usize,
    pub size_formatted: String,
    pub date_range: DateRange,
    pub average_record_size: usize,
}

pub fn data_summary(records: &[HistoryRecord]) -> Result<DataSummary> {
    let size = serde_json::to_vec(records)?.len();
    let domains: HashSet<String> = records.iter().map(|r| extract_domain(&r.url)).collect();
    let total = records.len();

    Ok(DataSummary {
        total_records: total,
        unique_domains: domains.len(),
        size_in_bytes: size,
        size_formatted: format_size(size),
        date_range: DateRange {
            start: records.iter().map(|r| r.last_visit_time).min(),
            end: records.iter().map(|r| r.last_visit_time).max(),
        },
        average_record_size: if total > 0 {
            (size as f64 / total as f64).round() as usize
        } else {
            0
        },
    })
}

/// Human-readable byte size with at most two decimals, e.g. `1.5 KB`.
pub fn format_size(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}
