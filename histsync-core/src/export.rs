use crate::analytics::{extract_domain, DailyCount, DateRange, DomainStat, HistoryStats};
use crate::error::Result;
use crate::format::format_timestamp;
use crate::types::HistoryRecord;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

const CSV_HEADER: &str = "Title,URL,Domain,Visit Time,Visit Count";

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Renders records as CSV, one row per record, text fields quoted.
pub fn to_csv(records: &[HistoryRecord]) -> String {
    let mut out = String::with_capacity(64 * (records.len() + 1));
    out.push_str(CSV_HEADER);
    for record in records {
        out.push('\n');
        out.push_str(&quote(&record.title));
        out.push(',');
        out.push_str(&quote(&record.url));
        out.push(',');
        out.push_str(&quote(&extract_domain(&record.url)));
        out.push(',');
        out.push_str(&quote(&format_timestamp(record.last_visit_time)));
        out.push(',');
        out.push_str(&record.visit_count.max(1).to_string());
    }
    out
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportSummary<'a> {
    total_count: usize,
    unique_domains: usize,
    date_range: &'a DateRange,
}

#[derive(Serialize)]
struct HourCount {
    hour: usize,
    count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsExport<'a> {
    export_time: String,
    summary: ExportSummary<'a>,
    domain_stats: &'a [DomainStat],
    hourly_distribution: Vec<HourCount>,
    daily_trend: &'a [DailyCount],
    top_websites: &'a [DomainStat],
}

/// Pretty-printed JSON report of `stats`, stamped with `export_time_ms`.
pub fn stats_to_json(stats: &HistoryStats, export_time_ms: i64) -> Result<String> {
    let export_time = DateTime::<Utc>::from_timestamp_millis(export_time_ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default();

    let doc = StatsExport {
        export_time,
        summary: ExportSummary {
            total_count: stats.total_count,
            unique_domains: stats.unique_domains,
            date_range: &stats.date_range,
        },
        domain_stats: &stats.domain_stats,
        hourly_distribution: stats
            .hourly_distribution
            .iter()
            .enumerate()
            .map(|(hour, count)| HourCount { hour, count: *count })
            .collect(),
        daily_trend: &stats.daily_trend,
        top_websites: &stats.top_websites,
    };

    Ok(serde_json::to_string_pretty(&doc)?)
}
