use serde::{Deserialize, Serialize};

/// Milliseconds in one hour.
pub const HOUR_MS: i64 = 60 * 60 * 1000;
/// Milliseconds in one day.
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// A raw item as returned by a history source, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawHistoryItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub last_visit_time: Option<i64>,
    #[serde(default)]
    pub visit_count: Option<u32>,
}

impl RawHistoryItem {
    pub fn new(url: impl Into<String>, last_visit_time: i64) -> Self {
        Self {
            id: None,
            url: Some(url.into()),
            title: None,
            last_visit_time: Some(last_visit_time),
            visit_count: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_visit_count(mut self, count: u32) -> Self {
        self.visit_count = Some(count);
        self
    }

    /// Timestamp used for ordering inside a source; missing times sort as epoch zero.
    pub fn time(&self) -> i64 {
        self.last_visit_time.unwrap_or(0)
    }
}

/// A single visit event reported by the source for one URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVisit {
    pub visit_id: String,
    pub visit_time: i64,
    #[serde(default)]
    pub referring_visit_id: Option<String>,
    #[serde(default)]
    pub transition: Option<String>,
}

/// A visit event with its display time attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitDetail {
    pub visit_id: String,
    pub visit_time: i64,
    pub formatted_time: String,
    pub referring_visit_id: Option<String>,
    pub transition: Option<String>,
}

/// Canonical history record shared by the fetcher, the sync engine and analytics.
///
/// Field names serialize in camelCase so that remote objects stay readable by
/// other clients of the same store layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub url: String,
    #[serde(default)]
    pub title: String,
    pub last_visit_time: i64,
    #[serde(default = "default_visit_count")]
    pub visit_count: u32,
    #[serde(default)]
    pub formatted_time: String,
}

fn default_visit_count() -> u32 {
    1
}

impl HistoryRecord {
    /// Key used to collapse overlapping fetch windows.
    pub fn fetch_key(&self) -> FetchKey {
        FetchKey {
            url: self.url.clone(),
            last_visit_time: self.last_visit_time,
        }
    }

    /// Key used to merge copies of the same entry held by different stores.
    pub fn identity(&self) -> Identity {
        match &self.id {
            Some(id) if !id.is_empty() => Identity::Id(id.clone()),
            _ => Identity::Url(self.url.clone()),
        }
    }
}

/// Visit-event identity: same URL recorded at the same instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FetchKey {
    pub url: String,
    pub last_visit_time: i64,
}

/// Cross-source identity: the stable id when known, else the URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Id(String),
    Url(String),
}

/// Uniform outcome of every user-facing sync operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<HistoryRecord>>,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            count: None,
            data: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            count: None,
            data: None,
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_data(mut self, data: Vec<HistoryRecord>) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: Option<&str>, url: &str) -> HistoryRecord {
        HistoryRecord {
            id: id.map(str::to_string),
            url: url.to_string(),
            title: "t".to_string(),
            last_visit_time: 1,
            visit_count: 1,
            formatted_time: String::new(),
        }
    }

    #[test]
    fn test_identity_prefers_id() {
        assert_eq!(record(Some("42"), "https://a.com").identity(), Identity::Id("42".into()));
        assert_eq!(
            record(None, "https://a.com").identity(),
            Identity::Url("https://a.com".into())
        );
        assert_eq!(
            record(Some(""), "https://a.com").identity(),
            Identity::Url("https://a.com".into())
        );
    }

    #[test]
    fn test_record_camel_case_wire_format() {
        let json = r#"{"id":"7","url":"https://x.org","title":"X","lastVisitTime":1000}"#;
        let rec: HistoryRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.visit_count, 1);
        assert_eq!(rec.last_visit_time, 1000);

        let out = serde_json::to_string(&rec).unwrap();
        assert!(out.contains("\"lastVisitTime\":1000"));
        assert!(out.contains("\"visitCount\":1"));
        assert!(out.contains("\"formattedTime\""));
    }

    #[test]
    fn test_operation_result_builders() {
        let r = OperationResult::ok("done").with_count(3);
        assert!(r.success);
        assert_eq!(r.count, Some(3));
        assert!(r.data.is_none());

        let f = OperationResult::failed("boom");
        assert!(!f.success);
        assert_eq!(f.message, "boom");
    }
}
