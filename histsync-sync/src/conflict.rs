//! Conflict resolution between two independently maintained full copies.
//!
//! Records are paired by reconciliation identity (id when known, else url).
//! Whatever side wins, the surviving record keeps the higher of the two visit
//! counts.

use histsync_core::{Error, HistoryRecord, Identity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Conflict resolution strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// Always keep the local copy
    LocalWins,
    /// Always keep the remote copy
    RemoteWins,
    /// Later `lastVisitTime` wins
    LatestTimestampWins,
    /// Higher `visitCount` wins
    MaxVisitCountWins,
    /// Higher visit count, then later visit time
    #[default]
    Smart,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalWins => "local-wins",
            Self::RemoteWins => "remote-wins",
            Self::LatestTimestampWins => "latest-timestamp-wins",
            Self::MaxVisitCountWins => "max-visit-count-wins",
            Self::Smart => "smart",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = Error;

    /// Accepts the canonical names and the short aliases
    /// `local`, `remote`, `latest` and `maxVisits`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "local-wins" | "local" => Ok(Self::LocalWins),
            "remote-wins" | "remote" => Ok(Self::RemoteWins),
            "latest-timestamp-wins" | "latest" => Ok(Self::LatestTimestampWins),
            "max-visit-count-wins" | "maxVisits" | "max-visits" => Ok(Self::MaxVisitCountWins),
            "smart" => Ok(Self::Smart),
            other => Err(Error::InvalidArgument(format!(
                "unknown conflict strategy '{}'",
                other
            ))),
        }
    }
}

/// Result of conflict resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// Use the local version
    UseLocal,
    /// Use the remote version
    UseRemote,
}

/// Two copies of the same logical entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    /// Unique ID for this conflict
    pub id: String,
    pub local: HistoryRecord,
    pub remote: HistoryRecord,
    pub strategy: ConflictStrategy,
    pub resolution: Option<ConflictResolution>,
}

impl Conflict {
    pub fn new(local: HistoryRecord, remote: HistoryRecord, strategy: ConflictStrategy) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            local,
            remote,
            strategy,
            resolution: None,
        }
    }

    /// Picks a side. Full ties go to the remote copy.
    pub fn resolve(&mut self) -> ConflictResolution {
        let (local, remote) = (&self.local, &self.remote);
        let later_local = local.last_visit_time > remote.last_visit_time;

        let keep_local = match self.strategy {
            ConflictStrategy::LocalWins => true,
            ConflictStrategy::RemoteWins => false,
            ConflictStrategy::LatestTimestampWins => later_local,
            ConflictStrategy::MaxVisitCountWins => local.visit_count > remote.visit_count,
            ConflictStrategy::Smart => {
                if local.visit_count != remote.visit_count {
                    local.visit_count > remote.visit_count
                } else {
                    later_local
                }
            }
        };

        let resolution = if keep_local {
            ConflictResolution::UseLocal
        } else {
            ConflictResolution::UseRemote
        };
        self.resolution = Some(resolution);
        resolution
    }

    /// The surviving record, carrying the larger visit count of both sides.
    pub fn winner(&mut self) -> HistoryRecord {
        let resolution = match self.resolution {
            Some(r) => r,
            None => self.resolve(),
        };
        let mut winner = match resolution {
            ConflictResolution::UseLocal => self.local.clone(),
            ConflictResolution::UseRemote => self.remote.clone(),
        };
        winner.visit_count = self.local.visit_count.max(self.remote.visit_count);
        winner
    }
}

/// Outcome of combining two full copies
#[derive(Debug, Clone, Default)]
pub struct ConflictReport {
    /// Local entries first (in local order), then remote-only entries.
    pub merged: Vec<HistoryRecord>,
    pub conflicts: Vec<Conflict>,
    pub remote_only: usize,
}

impl ConflictReport {
    pub fn local_kept(&self) -> usize {
        self.conflicts
            .iter()
            .filter(|c| c.resolution == Some(ConflictResolution::UseLocal))
            .count()
    }
}

/// Combines `local` and `remote`, resolving shared identities with `strategy`.
pub fn resolve_conflicts(
    local: &[HistoryRecord],
    remote: &[HistoryRecord],
    strategy: ConflictStrategy,
) -> Vec<HistoryRecord> {
    resolve_conflicts_detailed(local, remote, strategy).merged
}

pub fn resolve_conflicts_detailed(
    local: &[HistoryRecord],
    remote: &[HistoryRecord],
    strategy: ConflictStrategy,
) -> ConflictReport {
    let mut merged: Vec<HistoryRecord> = Vec::with_capacity(local.len() + remote.len());
    let mut index: HashMap<Identity, usize> = HashMap::with_capacity(local.len());
    let mut report = ConflictReport::default();

    for record in local {
        match index.get(&record.identity()) {
            // A later local duplicate replaces the earlier one in place.
            Some(&slot) => merged[slot] = record.clone(),
            None => {
                index.insert(record.identity(), merged.len());
                merged.push(record.clone());
            }
        }
    }

    for record in remote {
        let identity = record.identity();
        match index.get(&identity) {
            Some(&slot) => {
                let mut conflict = Conflict::new(merged[slot].clone(), record.clone(), strategy);
                merged[slot] = conflict.winner();
                report.conflicts.push(conflict);
            }
            None => {
                index.insert(identity, merged.len());
                merged.push(record.clone());
                report.remote_only += 1;
            }
        }
    }

    report.merged = merged;
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(url: &str, visits: u32, t: i64) -> HistoryRecord {
        HistoryRecord {
            id: None,
            url: url.to_string(),
            title: "t".to_string(),
            last_visit_time: t,
            visit_count: visits,
            formatted_time: String::new(),
        }
    }

    #[test]
    fn test_smart_tie_on_visits_prefers_later() {
        let merged = resolve_conflicts(
            &[rec("https://a", 5, 100)],
            &[rec("https://a", 5, 200)],
            ConflictStrategy::Smart,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].last_visit_time, 200);
    }

    #[test]
    fn test_smart_higher_visits_dominates() {
        let merged = resolve_conflicts(
            &[rec("https://a", 10, 50)],
            &[rec("https://a", 3, 999)],
            ConflictStrategy::Smart,
        );
        assert_eq!(merged[0].last_visit_time, 50);
        assert_eq!(merged[0].visit_count, 10);
    }

    #[test]
    fn test_winner_takes_max_visit_count() {
        let merged = resolve_conflicts(
            &[rec("https://a", 10, 50)],
            &[rec("https://a", 3, 999)],
            ConflictStrategy::LatestTimestampWins,
        );
        assert_eq!(merged[0].last_visit_time, 999);
        assert_eq!(merged[0].visit_count, 10);
    }

    #[test]
    fn test_full_tie_goes_remote() {
        let mut local = rec("https://a", 4, 100);
        local.title = "local".into();
        let mut remote = rec("https://a", 4, 100);
        remote.title = "remote".into();
        for strategy in [
            ConflictStrategy::Smart,
            ConflictStrategy::LatestTimestampWins,
            ConflictStrategy::MaxVisitCountWins,
        ] {
            let merged = resolve_conflicts(&[local.clone()], &[remote.clone()], strategy);
            assert_eq!(merged[0].title, "remote", "strategy {}", strategy);
        }
    }

    #[test]
    fn test_fixed_side_strategies() {
        let local = [rec("https://a", 1, 1)];
        let remote = [rec("https://a", 9, 9)];
        let l = resolve_conflicts(&local, &remote, ConflictStrategy::LocalWins);
        assert_eq!(l[0].last_visit_time, 1);
        assert_eq!(l[0].visit_count, 9);
        let r = resolve_conflicts(&local, &remote, ConflictStrategy::RemoteWins);
        assert_eq!(r[0].last_visit_time, 9);
    }

    #[test]
    fn test_identity_uses_id_before_url() {
        let mut a = rec("https://a", 1, 1);
        a.id = Some("7".into());
        let mut b = rec("https://b", 2, 2);
        b.id = Some("7".into());
        let report = resolve_conflicts_detailed(&[a], &[b, rec("https://c", 1, 3)], ConflictStrategy::Smart);
        assert_eq!(report.merged.len(), 2);
        assert_eq!(report.merged[0].url, "https://b");
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.remote_only, 1);
        assert_eq!(report.local_kept(), 0);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("smart".parse::<ConflictStrategy>().unwrap(), ConflictStrategy::Smart);
        assert_eq!("latest".parse::<ConflictStrategy>().unwrap(), ConflictStrategy::LatestTimestampWins);
        assert_eq!(
            "max-visit-count-wins".parse::<ConflictStrategy>().unwrap(),
            ConflictStrategy::MaxVisitCountWins
        );
        assert!("whatever".parse::<ConflictStrategy>().is_err());
        assert_eq!(ConflictStrategy::default(), ConflictStrategy::Smart);
        assert_eq!(ConflictStrategy::RemoteWins.to_string(), "remote-wins");
    }
}
