//! Normalization of raw source items into canonical records.

use crate::types::{HistoryRecord, RawHistoryItem, RawVisit, VisitDetail};
use chrono::{DateTime, FixedOffset, Utc};

/// Title used when the source reports none.
pub const PLACEHOLDER_TITLE: &str = "Untitled";

const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Formats an epoch-millisecond timestamp for display, in UTC.
pub fn format_timestamp(ms: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.format(DISPLAY_FORMAT).to_string(),
        None => String::new(),
    }
}

/// Formats an epoch-millisecond timestamp in a fixed offset.
pub fn format_timestamp_with_offset(ms: i64, offset: FixedOffset) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.with_timezone(&offset).format(DISPLAY_FORMAT).to_string(),
        None => String::new(),
    }
}

/// Converts a raw item into a canonical record.
///
/// Returns `None` when the item has no usable url. A missing or empty title
/// becomes [`PLACEHOLDER_TITLE`], a missing or zero visit count becomes 1.
pub fn normalize(raw: &RawHistoryItem) -> Option<HistoryRecord> {
    let url = raw.url.as_deref().filter(|u| !u.is_empty())?;
    let last_visit_time = raw.time();

    let title = match raw.title.as_deref() {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => PLACEHOLDER_TITLE.to_string(),
    };

    Some(HistoryRecord {
        id: raw.id.clone(),
        url: url.to_string(),
        title,
        last_visit_time,
        visit_count: raw.visit_count.filter(|c| *c > 0).unwrap_or(1),
        formatted_time: format_timestamp(last_visit_time),
    })
}

pub fn visit_detail(raw: &RawVisit) -> VisitDetail {
    VisitDetail {
        visit_id: raw.visit_id.clone(),
        visit_time: raw.visit_time,
        formatted_time: format_timestamp(raw.visit_time),
        referring_visit_id: raw.referring_visit_id.clone(),
        transition: raw.transition.clone(),
    }
}
