/// Table formatting for command output using comfy-table

use comfy_table::{presets::UTF8_FULL, Cell, CellAlignment, ContentArrangement, Table};
use histsync_core::analytics::{DomainStat, HistoryStats, StatsSummary};
use histsync_core::{HistoryRecord, VisitDetail};

const MAX_TITLE_WIDTH: usize = 60;

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

fn number(value: impl ToString) -> Cell {
    Cell::new(value.to_string()).set_alignment(CellAlignment::Right)
}

/// Records, newest first as given, at most `limit` rows.
pub fn format_records_table(records: &[HistoryRecord], limit: usize) -> String {
    if records.is_empty() {
        return "No history found".to_string();
    }

    let mut table = new_table();
    table.set_header(vec!["Time", "Title", "URL", "Visits"]);
    for record in records.iter().take(limit) {
        table.add_row(vec![
            Cell::new(&record.formatted_time),
            Cell::new(truncate(&record.title, MAX_TITLE_WIDTH)),
            Cell::new(truncate(&record.url, MAX_TITLE_WIDTH)),
            number(record.visit_count),
        ]);
    }
    table.to_string()
}

pub fn format_visits_table(visits: &[VisitDetail]) -> String {
    if visits.is_empty() {
        return "No visits recorded".to_string();
    }

    let mut table = new_table();
    table.set_header(vec!["Visit", "Time", "Referrer", "Transition"]);
    for visit in visits {
        table.add_row(vec![
            Cell::new(&visit.visit_id),
            Cell::new(&visit.formatted_time),
            Cell::new(visit.referring_visit_id.as_deref().unwrap_or("-")),
            Cell::new(visit.transition.as_deref().unwrap_or("-")),
        ]);
    }
    table.to_string()
}

pub fn format_domains_table(domains: &[DomainStat]) -> String {
    let mut table = new_table();
    table.set_header(vec!["Domain", "Visits", "Unique URLs", "Share"]);
    for stat in domains {
        table.add_row(vec![
            Cell::new(&stat.domain),
            number(stat.count),
            number(stat.unique_urls),
            number(format!("{:.1}%", stat.percentage)),
        ]);
    }
    table.to_string()
}

/// Hour-of-day histogram drawn with bars scaled to the busiest hour.
pub fn format_hourly_table(stats: &HistoryStats) -> String {
    const BAR_WIDTH: usize = 30;
    let peak = stats.hourly_distribution.iter().copied().max().unwrap_or(0);

    let mut table = new_table();
    table.set_header(vec!["Hour", "Visits", ""]);
    for (hour, count) in stats.hourly_distribution.iter().enumerate() {
        let bar = if peak == 0 {
            String::new()
        } else {
            "█".repeat(count * BAR_WIDTH / peak)
        };
        table.add_row(vec![
            Cell::new(format!("{:02}:00", hour)),
            number(count),
            Cell::new(bar),
        ]);
    }
    table.to_string()
}

pub fn format_summary_table(stats: &HistoryStats, summary: &StatsSummary) -> String {
    let mut table = new_table();
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec![Cell::new("Total visits"), number(stats.total_count)]);
    table.add_row(vec![Cell::new("Unique domains"), number(stats.unique_domains)]);
    table.add_row(vec![Cell::new("Days covered"), number(summary.total_days)]);
    table.add_row(vec![
        Cell::new("Average per day"),
        number(format!("{:.1}", summary.average_per_day)),
    ]);
    table.add_row(vec![
        Cell::new("Most active hour"),
        Cell::new(match summary.most_active_hour {
            Some(hour) => format!("{:02}:00 ({} visits)", hour, summary.most_active_hour_count),
            None => "-".to_string(),
        }),
    ]);
    table.add_row(vec![
        Cell::new("Most visited domain"),
        Cell::new(match &summary.most_visited_domain {
            Some(domain) => format!("{} ({} visits)", domain, summary.most_visited_domain_count),
            None => "-".to_string(),
        }),
    ]);
    table.to_string()
}

/// Two-column key/value table.
pub fn format_pairs_table(rows: &[(&str, String)]) -> String {
    let mut table = new_table();
    table.set_header(vec!["Key", "Value"]);
    for (key, value) in rows {
        table.add_row(vec![Cell::new(key), Cell::new(value)]);
    }
    table.to_string()
}
