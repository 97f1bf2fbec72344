//! Pure aggregation over a record set. No I/O, no mutation of the input.

use crate::types::HistoryRecord;
use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Bucket for URLs without a parseable host.
pub const UNKNOWN_DOMAIN: &str = "unknown";

const TOP_WEBSITES: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainStat {
    pub domain: String,
    pub count: usize,
    pub unique_urls: usize,
    pub last_visit: i64,
    /// Share of all records, rounded to one decimal.
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCount {
    /// `YYYY-MM-DD`
    pub date: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total_count: usize,
    pub unique_domains: usize,
    pub date_range: DateRange,
    pub domain_stats: Vec<DomainStat>,
    pub hourly_distribution: [usize; 24],
    pub daily_trend: Vec<DailyCount>,
    pub top_websites: Vec<DomainStat>,
}

impl Default for HistoryStats {
    fn default() -> Self {
        Self {
            total_count: 0,
            unique_domains: 0,
            date_range: DateRange::default(),
            domain_stats: Vec::new(),
            hourly_distribution: [0; 24],
            daily_trend: Vec::new(),
            top_websites: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub average_per_day: f64,
    pub most_active_hour: Option<u32>,
    pub most_active_hour_count: usize,
    pub most_visited_domain: Option<String>,
    pub most_visited_domain_count: usize,
    pub total_days: usize,
}

/// Host of `url` without a leading `www.`, or [`UNKNOWN_DOMAIN`].
pub fn extract_domain(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) if !host.is_empty() => host.strip_prefix("www.").unwrap_or(host).to_string(),
            _ => UNKNOWN_DOMAIN.to_string(),
        },
        Err(_) => UNKNOWN_DOMAIN.to_string(),
    }
}

/// Aggregates `records` with hours and days bucketed in UTC.
pub fn analyze(records: &[HistoryRecord]) -> HistoryStats {
    analyze_with_offset(records, Utc.fix())
}

/// Aggregates `records` with hours and days bucketed in `offset`.
pub fn analyze_with_offset(records: &[HistoryRecord], offset: FixedOffset) -> HistoryStats {
    if records.is_empty() {
        return HistoryStats::default();
    }

    let total = records.len();
    let start = records.iter().map(|r| r.last_visit_time).min();
    let end = records.iter().map(|r| r.last_visit_time).max();

    struct Acc<'a> {
        domain: String,
        count: usize,
        urls: HashSet<&'a str>,
        last_visit: i64,
    }

    // Insertion order is kept so that equal counts sort by first appearance.
    let mut order: Vec<Acc> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut hourly = [0usize; 24];
    let mut daily: BTreeMap<String, usize> = BTreeMap::new();

    for record in records {
        let domain = extract_domain(&record.url);
        let slot = match index.get(&domain) {
            Some(i) => *i,
            None => {
                index.insert(domain.clone(), order.len());
                order.push(Acc {
                    domain,
                    count: 0,
                    urls: HashSet::new(),
                    last_visit: 0,
                });
                order.len() - 1
            }
        };
        let acc = &mut order[slot];
        acc.count += 1;
        acc.urls.insert(record.url.as_str());
        acc.last_visit = acc.last_visit.max(record.last_visit_time);

        if let Some(local) = DateTime::<Utc>::from_timestamp_millis(record.last_visit_time)
            .map(|dt| dt.with_timezone(&offset))
        {
            hourly[local.hour() as usize] += 1;
            *daily.entry(local.format("%Y-%m-%d").to_string()).or_insert(0) += 1;
        }
    }

    let mut domain_stats: Vec<DomainStat> = order
        .into_iter()
        .map(|acc| DomainStat {
            percentage: round1(acc.count as f64 * 100.0 / total as f64),
            domain: acc.domain,
            count: acc.count,
            unique_urls: acc.urls.len(),
            last_visit: acc.last_visit,
        })
        .collect();
    domain_stats.sort_by(|a, b| b.count.cmp(&a.count));

    let top_websites = domain_stats.iter().take(TOP_WEBSITES).cloned().collect();

    HistoryStats {
        total_count: total,
        unique_domains: domain_stats.len(),
        date_range: DateRange { start, end },
        domain_stats,
        hourly_distribution: hourly,
        daily_trend: daily
            .into_iter()
            .map(|(date, count)| DailyCount { date, count })
            .collect(),
        top_websites,
    }
}

/// Headline numbers derived from a [`HistoryStats`].
pub fn summarize(stats: &HistoryStats) -> StatsSummary {
    if stats.total_count == 0 {
        return StatsSummary {
            average_per_day: 0.0,
            most_active_hour: None,
            most_active_hour_count: 0,
            most_visited_domain: None,
            most_visited_domain_count: 0,
            total_days: 0,
        };
    }

    let days = stats.daily_trend.len().max(1);

    let mut best_hour = 0u32;
    let mut best_count = 0usize;
    for (hour, count) in stats.hourly_distribution.iter().enumerate() {
        if *count > best_count {
            best_count = *count;
            best_hour = hour as u32;
        }
    }

    let top = stats.domain_stats.first();

    StatsSummary {
        average_per_day: round1(stats.total_count as f64 / days as f64),
        most_active_hour: Some(best_hour),
        most_active_hour_count: best_count,
        most_visited_domain: top.map(|d| d.domain.clone()),
        most_visited_domain_count: top.map(|d| d.count).unwrap_or(0),
        total_days: days,
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
