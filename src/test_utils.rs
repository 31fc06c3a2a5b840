#![cfg(test)]

use crate::engine::governor::{RateGovernor, DEFAULT_SAFETY_THRESHOLD};
use crate::engine::progress::ProgressStore;
use crate::engine::retry::{RetryExecutor, RetryPolicy};
use crate::engine::task::{TaskContext, TaskOptions};
use crate::engine::types::ForkRecord;
use crate::github::host::ForkHost;
use crate::github::types::{
    CommitSummary, Comparison, RateBudget, RemoteError, RemoteRepo, RemoteResult, RepoId,
    RepositoryRef,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

pub fn make_repo(full_name: &str, secs_ago: i64) -> RemoteRepo {
    let (owner, name) = full_name.split_once('/').unwrap_or((full_name, "repo"));
    RemoteRepo {
        id: RepoId::new(owner, name),
        html_url: format!("https://github.com/{full_name}"),
        stars: 0,
        forks: 0,
        description: None,
        default_branch: "main".to_string(),
        updated_at: Some(Utc::now() - Duration::seconds(secs_ago)),
    }
}

pub fn make_record(name: &str, secs_ago: i64) -> ForkRecord {
    ForkRecord {
        name: name.to_string(),
        url: format!("https://github.com/{name}"),
        stars: 0,
        forks: 0,
        last_updated: Some(Utc::now() - Duration::seconds(secs_ago)),
        description: None,
        default_branch: "main".to_string(),
        ahead_by: None,
        behind_by: None,
        branches: Vec::new(),
        branch_comparisons: BTreeMap::new(),
    }
}

pub fn budget_in(remaining: u32, secs: i64) -> RateBudget {
    RateBudget {
        remaining,
        reset_at: Utc::now() + Duration::seconds(secs),
    }
}

pub fn task_context(
    host: Arc<FakeHost>,
    upstream: RepositoryRef,
    options: TaskOptions,
) -> Arc<TaskContext> {
    let progress = Arc::new(ProgressStore::new());
    let governor = Arc::new(RateGovernor::new(host.clone(), DEFAULT_SAFETY_THRESHOLD));
    Arc::new(TaskContext {
        host,
        retry: RetryExecutor::new(governor, progress.clone(), RetryPolicy::default()),
        progress,
        upstream,
        options,
    })
}

#[derive(Default)]
struct FakeState {
    repos: HashMap<String, RemoteRepo>,
    forks: Vec<RemoteRepo>,
    branches: HashMap<String, Vec<String>>,
    commits: HashMap<String, Vec<CommitSummary>>,
    comparisons: HashMap<String, Comparison>,
    budgets: VecDeque<RemoteResult<RateBudget>>,
    budget: Option<RateBudget>,
    failures: HashMap<String, VecDeque<RemoteError>>,
    panics: HashSet<String>,
    calls: Vec<String>,
}

/// In-memory host. Every call is logged under a key such as
/// `resolve:owner/name` or `compare:owner:branch`; queued failures for that
/// key are returned first, one per call.
#[derive(Default)]
pub struct FakeHost {
    state: Mutex<FakeState>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_repo(&self, repo: RemoteRepo) {
        let mut s = self.state.lock().unwrap();
        s.repos.insert(repo.full_name(), repo);
    }

    /// Lists `repo` as a fork and makes it resolvable.
    pub fn add_fork(&self, repo: RemoteRepo) {
        let mut s = self.state.lock().unwrap();
        s.repos.insert(repo.full_name(), repo.clone());
        s.forks.push(repo);
    }

    /// Makes `listed` resolve to `repo`, as after a rename or transfer.
    pub fn rename(&self, listed: &str, repo: RemoteRepo) {
        self.state
            .lock()
            .unwrap()
            .repos
            .insert(listed.to_string(), repo);
    }

    /// Keeps the fork listed but makes it unresolvable.
    pub fn forget_repo(&self, full_name: &str) {
        self.state.lock().unwrap().repos.remove(full_name);
    }

    pub fn set_branches(&self, full_name: &str, branches: &[&str]) {
        self.state.lock().unwrap().branches.insert(
            full_name.to_string(),
            branches.iter().map(|b| b.to_string()).collect(),
        );
    }

    pub fn set_commits(&self, full_name: &str, commits: Vec<CommitSummary>) {
        self.state
            .lock()
            .unwrap()
            .commits
            .insert(full_name.to_string(), commits);
    }

    pub fn set_comparison(&self, head: &str, ahead_by: u32, behind_by: u32) {
        self.state.lock().unwrap().comparisons.insert(
            head.to_string(),
            Comparison {
                ahead_by,
                behind_by,
            },
        );
    }

    /// Queues a one-shot budget answer, served before the sticky one.
    pub fn push_budget(&self, budget: RemoteResult<RateBudget>) {
        self.state.lock().unwrap().budgets.push_back(budget);
    }

    pub fn set_budget(&self, budget: RateBudget) {
        self.state.lock().unwrap().budget = Some(budget);
    }

    pub fn fail(&self, key: &str, error: RemoteError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(key.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn panic_on(&self, key: &str) {
        self.state.lock().unwrap().panics.insert(key.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, key: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| *c == key)
            .count()
    }

    /// Logs the call, then answers from the failure queue or `answer`.
    fn call<T>(
        &self,
        key: String,
        answer: impl FnOnce(&FakeState) -> RemoteResult<T>,
    ) -> RemoteResult<T> {
        let result = {
            let mut s = self.state.lock().unwrap();
            s.calls.push(key.clone());
            if s.panics.contains(&key) {
                None
            } else if let Some(err) = s.failures.get_mut(&key).and_then(|q| q.pop_front()) {
                Some(Err(err))
            } else {
                Some(answer(&s))
            }
        };
        // guard is released so a panic does not poison the state
        match result {
            Some(result) => result,
            None => panic!("injected panic at {key}"),
        }
    }
}

#[async_trait]
impl ForkHost for FakeHost {
    async fn resolve_repository(&self, id: &RepoId) -> RemoteResult<RemoteRepo> {
        let full = id.to_string();
        self.call(format!("resolve:{full}"), |s| {
            s.repos
                .get(&full)
                .cloned()
                .ok_or_else(|| RemoteError::NotFound(full.clone()))
        })
    }

    async fn rate_budget(&self) -> RemoteResult<RateBudget> {
        let queued = {
            let mut s = self.state.lock().unwrap();
            s.calls.push("budget".to_string());
            s.budgets.pop_front()
        };
        match queued {
            Some(answer) => answer,
            None => {
                let s = self.state.lock().unwrap();
                Ok(s.budget.clone().unwrap_or_else(|| budget_in(5000, 3600)))
            }
        }
    }

    async fn list_forks(
        &self,
        repo: &RepositoryRef,
        limit: Option<usize>,
    ) -> RemoteResult<Vec<RemoteRepo>> {
        self.call(format!("forks:{}", repo.id), |s| {
            let take = limit.unwrap_or(usize::MAX);
            Ok(s.forks.iter().take(take).cloned().collect())
        })
    }

    async fn list_branches(&self, id: &RepoId) -> RemoteResult<Vec<String>> {
        let full = id.to_string();
        self.call(format!("branches:{full}"), |s| {
            Ok(s.branches.get(&full).cloned().unwrap_or_default())
        })
    }

    async fn recent_commits(&self, id: &RepoId, _page: u32) -> RemoteResult<Vec<CommitSummary>> {
        let full = id.to_string();
        self.call(format!("commits:{full}"), |s| {
            Ok(s.commits.get(&full).cloned().unwrap_or_default())
        })
    }

    async fn compare_refs(
        &self,
        _upstream: &RepositoryRef,
        _base: &str,
        head: &str,
    ) -> RemoteResult<Comparison> {
        self.call(format!("compare:{head}"), |s| {
            s.comparisons
                .get(head)
                .copied()
                .ok_or_else(|| RemoteError::NotFound(format!("no merge base for {head}")))
        })
    }
}
