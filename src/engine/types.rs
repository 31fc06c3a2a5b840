use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchComparison {
    pub ahead_by: u32,
    pub behind_by: u32,
}

/// Result of one completed fork. Immutable once stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForkRecord {
    pub name: String,
    pub url: String,
    pub stars: u32,
    pub forks: u32,
    /// Latest commit time, else the repository timestamp. `None` when neither is known.
    pub last_updated: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub default_branch: String,
    pub ahead_by: Option<u32>,
    pub behind_by: Option<u32>,
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub branch_comparisons: BTreeMap<String, BranchComparison>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    pub processed: u64,
    pub errored: u64,
    pub skipped_no_diff: u64,
    pub nonexistent: u64,
    pub rate_limit_events: u64,
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// Budget fell below the hard floor; progress was saved and a resume is advised.
    PausedForBudget,
    /// Cancelled from outside; progress was saved.
    Interrupted,
}

impl RunStatus {
    pub fn exit_code(self) -> u8 {
        match self {
            RunStatus::Completed => 0,
            RunStatus::PausedForBudget => 2,
            RunStatus::Interrupted => 130,
        }
    }
}
