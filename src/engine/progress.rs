use crate::checkpoint::Checkpoint;
use crate::engine::task::TaskOutcome;
use crate::engine::types::{Counters, ForkRecord};
use crate::github::types::RepoId;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct ProgressState {
    counters: Counters,
    processed: HashSet<String>,
    records: Vec<ForkRecord>,
}

/// Counters, the processed-name set and gathered records behind one lock.
///
/// Every task completion is folded in a single critical section, so a
/// snapshot never sees a fork counted but not yet marked processed.
#[derive(Debug, Default)]
pub struct ProgressStore {
    state: Mutex<ProgressState>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_processed(&self, name: &str) -> bool {
        self.lock().processed.contains(name)
    }

    /// Counts one rate-limit event and returns the new total.
    pub fn note_rate_limit(&self) -> u64 {
        let mut state = self.lock();
        state.counters.rate_limit_events += 1;
        state.counters.rate_limit_events
    }

    /// Folds a finished task into the store and returns the updated counters.
    pub fn record(&self, name: &str, outcome: TaskOutcome) -> Counters {
        let mut state = self.lock();
        match outcome {
            TaskOutcome::AlreadyProcessed => return state.counters,
            TaskOutcome::Nonexistent => state.counters.nonexistent += 1,
            TaskOutcome::SkippedNoDiff => state.counters.skipped_no_diff += 1,
            TaskOutcome::Failed(_) => state.counters.errored += 1,
            TaskOutcome::Completed(record) => {
                match state.records.iter().position(|r| r.name == record.name) {
                    Some(idx) => state.records[idx] = *record,
                    None => state.records.push(*record),
                }
            }
        }
        state.counters.processed += 1;
        state.processed.insert(name.to_string());
        state.counters
    }

    pub fn counters(&self) -> Counters {
        self.lock().counters
    }

    pub fn processed_len(&self) -> usize {
        self.lock().processed.len()
    }

    pub fn records(&self) -> Vec<ForkRecord> {
        self.lock().records.clone()
    }

    pub fn snapshot(&self, repo: &RepoId) -> Checkpoint {
        let state = self.lock();
        Checkpoint::new(
            repo,
            state.records.clone(),
            state.processed.iter().cloned().collect(),
        )
    }

    /// Replaces the processed set and records with the checkpoint's contents.
    pub fn restore(&self, checkpoint: Checkpoint) {
        let mut state = self.lock();
        state.processed = checkpoint.processed_fork_names.into_iter().collect();
        state.records = checkpoint.forks_info;
    }
}
