use crate::engine::progress::ProgressStore;
use crate::engine::retry::RetryExecutor;
use crate::engine::types::{BranchComparison, ForkRecord};
use crate::github::host::ForkHost;
use crate::github::types::{RemoteRepo, RepoId, RepositoryRef};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOptions {
    pub show_comparison: bool,
    pub skip_no_diff: bool,
    pub check_branches: bool,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            show_comparison: true,
            skip_no_diff: false,
            check_branches: true,
        }
    }
}

/// Everything a fork task needs, shared by all workers.
pub struct TaskContext {
    pub host: Arc<dyn ForkHost>,
    pub retry: RetryExecutor,
    pub progress: Arc<ProgressStore>,
    pub upstream: RepositoryRef,
    pub options: TaskOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    AlreadyProcessed,
    Nonexistent,
    SkippedNoDiff,
    Completed(Box<ForkRecord>),
    Failed(String),
}

/// A fork as it resolved, which may differ from the listed owner or name.
#[derive(Debug)]
struct Found {
    id: RepoId,
    record: ForkRecord,
}

#[derive(Debug)]
enum State {
    Pending,
    ExistenceCheck,
    CommitLookup(RemoteRepo),
    BranchEnumeration(Box<Found>),
    PerBranchComparison(Box<Found>),
    DefaultBranchComparison(Box<Found>),
    Done(TaskOutcome),
}

/// Works out how one fork relates to upstream.
///
/// Degrades instead of failing wherever possible: a missing commit list falls
/// back to the repository timestamp, a failed branch listing yields no
/// branches, and a failed comparison only drops that branch.
pub struct ForkTask<'a> {
    ctx: &'a TaskContext,
    fork: &'a RemoteRepo,
}

impl<'a> ForkTask<'a> {
    pub fn new(ctx: &'a TaskContext, fork: &'a RemoteRepo) -> Self {
        Self { ctx, fork }
    }

    pub async fn run(self) -> TaskOutcome {
        let mut state = State::Pending;
        loop {
            state = match state {
                State::Done(outcome) => return outcome,
                other => self.step(other).await,
            };
        }
    }

    async fn step(&self, state: State) -> State {
        match state {
            State::Pending => {
                if self.ctx.progress.is_processed(&self.fork.full_name()) {
                    State::Done(TaskOutcome::AlreadyProcessed)
                } else {
                    State::ExistenceCheck
                }
            }
            State::ExistenceCheck => self.check_exists().await,
            State::CommitLookup(repo) => {
                let found = self.lookup_commits(repo).await;
                let opts = self.ctx.options;
                if opts.check_branches {
                    State::BranchEnumeration(found)
                } else if opts.show_comparison {
                    State::DefaultBranchComparison(found)
                } else {
                    finish(found)
                }
            }
            State::BranchEnumeration(found) => self.enumerate_branches(found).await,
            State::PerBranchComparison(found) => self.compare_branches(found).await,
            State::DefaultBranchComparison(found) => self.compare_default(found).await,
            State::Done(outcome) => State::Done(outcome),
        }
    }

    async fn check_exists(&self) -> State {
        let id = &self.fork.id;
        match self
            .ctx
            .retry
            .execute("resolve fork", || self.ctx.host.resolve_repository(id))
            .await
        {
            Ok(repo) => State::CommitLookup(repo),
            Err(e) => {
                if e.is_not_found() {
                    debug!(fork = %id, "fork no longer exists");
                } else {
                    warn!(fork = %id, error = %e, "could not resolve fork, treating as gone");
                }
                State::Done(TaskOutcome::Nonexistent)
            }
        }
    }

    async fn lookup_commits(&self, repo: RemoteRepo) -> Box<Found> {
        let latest = self
            .ctx
            .retry
            .execute("recent commits", || self.ctx.host.recent_commits(&repo.id, 1))
            .await
            .ok()
            .and_then(|commits| commits.into_iter().next())
            .and_then(|c| {
                debug!(fork = %repo.id, sha = %c.sha, "latest commit");
                c.authored_at
            });

        if repo.id != self.fork.id {
            debug!(listed = %self.fork.id, resolved = %repo.id, "fork was renamed or moved");
        }

        Box::new(Found {
            record: ForkRecord {
                name: repo.full_name(),
                url: repo.html_url,
                stars: repo.stars,
                forks: repo.forks,
                last_updated: latest.or(repo.updated_at),
                description: repo.description,
                default_branch: repo.default_branch,
                ahead_by: None,
                behind_by: None,
                branches: Vec::new(),
                branch_comparisons: BTreeMap::new(),
            },
            id: repo.id,
        })
    }

    async fn enumerate_branches(&self, mut found: Box<Found>) -> State {
        let id = &found.id;
        match self
            .ctx
            .retry
            .execute("list branches", || self.ctx.host.list_branches(id))
            .await
        {
            Ok(branches) => found.record.branches = branches,
            Err(e) => warn!(fork = %id, error = %e, "could not list branches"),
        }

        if self.ctx.options.show_comparison {
            State::PerBranchComparison(found)
        } else {
            finish(found)
        }
    }

    async fn compare_branches(&self, mut found: Box<Found>) -> State {
        // Default branch first so a no-diff fork costs a single comparison.
        let default_branch = found.record.default_branch.clone();
        let mut order: Vec<String> = found.record.branches.clone();
        if let Some(pos) = order.iter().position(|b| *b == default_branch) {
            let default = order.remove(pos);
            order.insert(0, default);
        }

        for branch in order {
            let Some(cmp) = self.compare(&found.id, &branch).await else {
                continue;
            };
            let record = &mut found.record;
            record.branch_comparisons.insert(branch.clone(), cmp);

            if branch == default_branch {
                record.ahead_by = Some(cmp.ahead_by);
                record.behind_by = Some(cmp.behind_by);
                if self.is_skippable(cmp) {
                    return State::Done(TaskOutcome::SkippedNoDiff);
                }
            }
        }

        finish(found)
    }

    async fn compare_default(&self, mut found: Box<Found>) -> State {
        let branch = found.record.default_branch.clone();
        if let Some(cmp) = self.compare(&found.id, &branch).await {
            found.record.ahead_by = Some(cmp.ahead_by);
            found.record.behind_by = Some(cmp.behind_by);
            if self.is_skippable(cmp) {
                return State::Done(TaskOutcome::SkippedNoDiff);
            }
        }
        finish(found)
    }

    /// Compares one branch of `fork` with the upstream default branch. `None`
    /// means no usable answer; a missing merge base is expected and not logged as a warning.
    async fn compare(&self, fork: &RepoId, branch: &str) -> Option<BranchComparison> {
        let upstream = &self.ctx.upstream;
        let head = format!("{}:{}", fork.owner, branch);
        match self
            .ctx
            .retry
            .execute("compare branch", || {
                self.ctx
                    .host
                    .compare_refs(upstream, &upstream.default_branch, &head)
            })
            .await
        {
            Ok(c) => Some(BranchComparison {
                ahead_by: c.ahead_by,
                behind_by: c.behind_by,
            }),
            Err(e) if e.is_not_found() => {
                debug!(fork = %fork, branch, "no common ancestor");
                None
            }
            Err(e) => {
                warn!(fork = %fork, branch, error = %e, "could not compare branch");
                None
            }
        }
    }

    fn is_skippable(&self, cmp: BranchComparison) -> bool {
        self.ctx.options.skip_no_diff && cmp.ahead_by == 0 && cmp.behind_by == 0
    }
}

fn finish(found: Box<Found>) -> State {
    State::Done(TaskOutcome::Completed(Box::new(found.record)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::types::{CommitSummary, RemoteError};
    use crate::test_utils::{make_repo, task_context, FakeHost};
    use chrono::{Duration, Utc};

    fn upstream() -> RepositoryRef {
        make_repo("up/proj", 0).to_ref()
    }

    async fn run(host: &Arc<FakeHost>, fork: &RemoteRepo, options: TaskOptions) -> TaskOutcome {
        let ctx = task_context(host.clone(), upstream(), options);
        ForkTask::new(&ctx, fork).run().await
    }

    fn completed(outcome: TaskOutcome) -> ForkRecord {
        match outcome {
            TaskOutcome::Completed(record) => *record,
            other => panic!("expected completed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn already_processed_makes_no_calls() {
        let host = Arc::new(FakeHost::new());
        let fork = make_repo("alice/proj", 10);
        host.add_fork(fork.clone());
        let ctx = task_context(host.clone(), upstream(), TaskOptions::default());
        ctx.progress.record("alice/proj", TaskOutcome::Nonexistent);

        let outcome = ForkTask::new(&ctx, &fork).run().await;

        assert_eq!(outcome, TaskOutcome::AlreadyProcessed);
        assert!(host.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_fork_is_nonexistent() {
        let host = Arc::new(FakeHost::new());
        let fork = make_repo("alice/proj", 10);

        let outcome = run(&host, &fork, TaskOptions::default()).await;

        assert_eq!(outcome, TaskOutcome::Nonexistent);
        assert_eq!(host.call_count("resolve:alice/proj"), 1);
        assert_eq!(host.call_count("commits:alice/proj"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn compares_every_branch_and_swallows_missing_merge_base() {
        let host = Arc::new(FakeHost::new());
        let fork = make_repo("alice/proj", 10);
        host.add_fork(fork.clone());
        host.set_branches("alice/proj", &["dev", "main", "feature-x"]);
        host.set_comparison("alice:main", 3, 1);
        host.set_comparison("alice:dev", 7, 0);

        let record = completed(run(&host, &fork, TaskOptions::default()).await);

        assert_eq!(record.branches, vec!["dev", "main", "feature-x"]);
        assert_eq!(record.ahead_by, Some(3));
        assert_eq!(record.behind_by, Some(1));
        assert_eq!(
            record.branch_comparisons.get("dev"),
            Some(&BranchComparison { ahead_by: 7, behind_by: 0 })
        );
        assert!(!record.branch_comparisons.contains_key("feature-x"));
        assert_eq!(host.call_count("compare:alice:feature-x"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_comparison_skips_only_that_branch() {
        let host = Arc::new(FakeHost::new());
        let fork = make_repo("alice/proj", 10);
        host.add_fork(fork.clone());
        host.set_branches("alice/proj", &["main", "broken", "dev"]);
        host.set_comparison("alice:main", 1, 1);
        host.set_comparison("alice:broken", 1, 1);
        host.set_comparison("alice:dev", 2, 0);
        for _ in 0..5 {
            host.fail("compare:alice:broken", RemoteError::Transient("502".into()));
        }

        let record = completed(run(&host, &fork, TaskOptions::default()).await);

        assert!(!record.branch_comparisons.contains_key("broken"));
        assert!(record.branch_comparisons.contains_key("dev"));
        assert_eq!(host.call_count("compare:alice:broken"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn identical_fork_is_skipped_only_when_asked() {
        let host = Arc::new(FakeHost::new());
        let fork = make_repo("alice/proj", 10);
        host.add_fork(fork.clone());
        host.set_branches("alice/proj", &["other", "main"]);
        host.set_comparison("alice:main", 0, 0);
        host.set_comparison("alice:other", 4, 0);

        let skip = TaskOptions {
            skip_no_diff: true,
            ..TaskOptions::default()
        };
        assert_eq!(run(&host, &fork, skip).await, TaskOutcome::SkippedNoDiff);
        // default branch is compared first, so nothing else was spent
        assert_eq!(host.call_count("compare:alice:other"), 0);

        let record = completed(run(&host, &fork, TaskOptions::default()).await);
        assert_eq!((record.ahead_by, record.behind_by), (Some(0), Some(0)));
    }

    #[tokio::test(start_paused = true)]
    async fn without_branch_listing_only_default_is_compared() {
        let host = Arc::new(FakeHost::new());
        let fork = make_repo("alice/proj", 10);
        host.add_fork(fork.clone());
        host.set_branches("alice/proj", &["main", "dev"]);
        host.set_comparison("alice:main", 5, 2);

        let options = TaskOptions {
            check_branches: false,
            ..TaskOptions::default()
        };
        let record = completed(run(&host, &fork, options).await);

        assert_eq!((record.ahead_by, record.behind_by), (Some(5), Some(2)));
        assert!(record.branches.is_empty());
        assert!(record.branch_comparisons.is_empty());
        assert_eq!(host.call_count("branches:alice/proj"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn no_comparison_leaves_summary_empty() {
        let host = Arc::new(FakeHost::new());
        let fork = make_repo("alice/proj", 10);
        host.add_fork(fork.clone());
        host.set_branches("alice/proj", &["main"]);

        let options = TaskOptions {
            show_comparison: false,
            ..TaskOptions::default()
        };
        let record = completed(run(&host, &fork, options).await);

        assert_eq!(record.branches, vec!["main"]);
        assert_eq!(record.ahead_by, None);
        assert!(host.calls().iter().all(|c| !c.starts_with("compare:")));
    }

    #[tokio::test(start_paused = true)]
    async fn renamed_fork_is_queried_under_its_new_name() {
        let host = Arc::new(FakeHost::new());
        let listed = make_repo("alice/proj", 10);
        host.add_fork(listed.clone());
        host.rename("alice/proj", make_repo("carol/proj", 10));
        host.set_branches("carol/proj", &["main", "dev"]);
        host.set_comparison("carol:main", 4, 1);

        let record = completed(run(&host, &listed, TaskOptions::default()).await);

        assert_eq!(record.name, "carol/proj");
        assert_eq!(record.branches, vec!["main", "dev"]);
        assert_eq!((record.ahead_by, record.behind_by), (Some(4), Some(1)));
        assert_eq!(host.call_count("commits:carol/proj"), 1);
        assert_eq!(host.call_count("branches:carol/proj"), 1);
        assert_eq!(host.call_count("compare:carol:dev"), 1);
        assert!(host
            .calls()
            .iter()
            .all(|c| !c.starts_with("branches:alice") && !c.starts_with("compare:alice")));
    }

    #[tokio::test(start_paused = true)]
    async fn last_update_prefers_latest_commit() {
        let host = Arc::new(FakeHost::new());
        let fork = make_repo("alice/proj", 3600);
        host.add_fork(fork.clone());
        let authored = Utc::now() - Duration::seconds(60);
        host.set_commits(
            "alice/proj",
            vec![CommitSummary {
                sha: "abc".into(),
                authored_at: Some(authored),
            }],
        );

        let record = completed(run(&host, &fork, TaskOptions::default()).await);
        assert_eq!(record.last_updated, Some(authored));
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_lookups_still_complete() {
        let host = Arc::new(FakeHost::new());
        let fork = make_repo("alice/proj", 3600);
        host.add_fork(fork.clone());
        for _ in 0..5 {
            host.fail("commits:alice/proj", RemoteError::Transient("timeout".into()));
            host.fail("branches:alice/proj", RemoteError::Transient("timeout".into()));
        }

        let record = completed(run(&host, &fork, TaskOptions::default()).await);

        assert_eq!(record.last_updated, fork.updated_at);
        assert!(record.branches.is_empty());
        assert_eq!(record.ahead_by, None);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_activity_stays_unknown() {
        let host = Arc::new(FakeHost::new());
        let mut fork = make_repo("alice/proj", 0);
        fork.updated_at = None;
        host.add_fork(fork.clone());

        let record = completed(run(&host, &fork, TaskOptions::default()).await);

        assert_eq!(record.last_updated, None);
    }
}
