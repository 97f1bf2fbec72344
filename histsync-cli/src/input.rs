/// Loading a browser history dump into an in-memory source
///
/// Two layouts are accepted: a bare JSON array of history items, or an object
/// with `items` and an optional `visits` map keyed by URL.

use anyhow::{Context, Result};
use histsync_core::{MemoryHistorySource, RawHistoryItem, RawVisit};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryDump {
    Items(Vec<RawHistoryItem>),
    Full {
        items: Vec<RawHistoryItem>,
        #[serde(default)]
        visits: HashMap<String, Vec<RawVisit>>,
    },
}

pub fn parse_history(json: &str) -> Result<MemoryHistorySource> {
    let dump: HistoryDump = serde_json::from_str(json).context("Invalid history dump")?;
    let (items, visits) = match dump {
        HistoryDump::Items(items) => (items, HashMap::new()),
        HistoryDump::Full { items, visits } => (items, visits),
    };

    let source = MemoryHistorySource::from_items(items);
    for (url, list) in visits {
        for visit in list {
            source.add_visit(url.clone(), visit);
        }
    }
    Ok(source)
}

pub fn load_history(path: &Path) -> Result<MemoryHistorySource> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read history file {}", path.display()))?;
    parse_history(&json)
}
