use crate::checkpoint::CheckpointStore;
use crate::engine::governor::RateGovernor;
use crate::engine::pool::{Completion, WorkerPool};
use crate::engine::progress::ProgressStore;
use crate::engine::retry::{RetryExecutor, RetryPolicy};
use crate::engine::task::{TaskContext, TaskOptions, TaskOutcome};
use crate::engine::types::{Counters, ForkRecord, RunStatus};
use crate::error::{ForkscanError, Result};
use crate::github::host::ForkHost;
use crate::github::types::{RepoId, RepositoryRef};
use crate::report;
use chrono::Local;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Immutable settings for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_forks: Option<usize>,
    pub workers: usize,
    pub resume: bool,
    pub task: TaskOptions,
    pub safety_threshold: u32,
    pub hard_floor: u32,
    pub recheck_every: u64,
    pub checkpoint_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_forks: None,
            workers: 10,
            resume: false,
            task: TaskOptions::default(),
            safety_threshold: 100,
            hard_floor: 50,
            recheck_every: 3,
            checkpoint_interval: Duration::from_secs(5 * 60),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub upstream: RepositoryRef,
    pub status: RunStatus,
    /// Sorted by last activity, newest first.
    pub records: Vec<ForkRecord>,
    pub counters: Counters,
    pub discovered: usize,
    /// Forks handed to the pool; discovered minus those restored as processed.
    pub scheduled: usize,
    pub elapsed: Duration,
}

impl RunReport {
    fn interrupted_before_start(upstream: RepositoryRef, started: Instant) -> Self {
        Self {
            upstream,
            status: RunStatus::Interrupted,
            records: Vec::new(),
            counters: Counters::default(),
            discovered: 0,
            scheduled: 0,
            elapsed: started.elapsed(),
        }
    }
}

pub struct Orchestrator {
    host: Arc<dyn ForkHost>,
    options: RunOptions,
    checkpoints: CheckpointStore,
}

impl Orchestrator {
    pub fn new(host: Arc<dyn ForkHost>, options: RunOptions, checkpoints: CheckpointStore) -> Self {
        Self {
            host,
            options,
            checkpoints,
        }
    }

    pub async fn run(&self, target: &RepoId, cancel: CancellationToken) -> Result<RunReport> {
        let started = Instant::now();
        let opts = &self.options;
        let progress = Arc::new(ProgressStore::new());
        let governor = Arc::new(RateGovernor::new(self.host.clone(), opts.safety_threshold));
        let retry = RetryExecutor::new(governor.clone(), progress.clone(), opts.retry.clone());

        let resolved = until_cancelled(
            &cancel,
            retry.execute("resolve repository", || self.host.resolve_repository(target)),
        )
        .await;
        let upstream = match resolved {
            None => {
                warn!("interrupted before the repository was resolved");
                let unresolved = RepositoryRef {
                    id: target.clone(),
                    default_branch: String::new(),
                };
                return Ok(RunReport::interrupted_before_start(unresolved, started));
            }
            Some(Ok(repo)) => repo.to_ref(),
            Some(Err(e)) if e.is_not_found() => {
                return Err(ForkscanError::RepoNotFound(target.to_string()))
            }
            Some(Err(e)) => return Err(e.into()),
        };

        let Some(budget) = until_cancelled(&cancel, governor.acquire()).await else {
            warn!("interrupted while waiting for the rate budget");
            return Ok(RunReport::interrupted_before_start(upstream, started));
        };
        info!(
            remaining = budget.remaining,
            resets_at = %budget.reset_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            "rate budget"
        );

        info!(repo = %upstream.id, "listing forks");
        let listed = until_cancelled(
            &cancel,
            retry.execute("list forks", || self.host.list_forks(&upstream, opts.max_forks)),
        )
        .await;
        let Some(listed) = listed else {
            warn!("interrupted while listing forks");
            return Ok(RunReport::interrupted_before_start(upstream, started));
        };
        let mut forks = listed?;
        if let Some(max) = opts.max_forks {
            if forks.len() > max {
                forks.truncate(max);
            }
            info!(max, "only the first forks will be processed");
        }
        let discovery: Vec<String> = forks.iter().map(|f| f.full_name()).collect();
        let total = forks.len();
        info!(total, "forks found");

        if opts.resume {
            if let Some(cp) = self.checkpoints.load(&upstream.id) {
                progress.restore(cp);
                info!(processed = progress.processed_len(), "resuming from checkpoint");
            }
        }
        let pending: Vec<_> = forks
            .into_iter()
            .filter(|f| !progress.is_processed(&f.full_name()))
            .collect();
        let scheduled = pending.len();
        if scheduled < total {
            info!(skipped = total - pending.len(), "already processed forks are skipped");
        }
        info!(
            workers = opts.workers,
            pending = scheduled,
            check_branches = opts.task.check_branches,
            skip_no_diff = opts.task.skip_no_diff,
            "processing forks"
        );

        let ctx = Arc::new(TaskContext {
            host: self.host.clone(),
            retry,
            progress: progress.clone(),
            upstream: upstream.clone(),
            options: opts.task,
        });
        let pool_cancel = cancel.child_token();
        let mut pool = WorkerPool::start(opts.workers, pending, ctx, pool_cancel.clone());

        let period = opts.checkpoint_interval.max(Duration::from_secs(1));
        let mut checkpoint_tick = interval_at(Instant::now() + period, period);
        checkpoint_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rechecked_at = 0u64;

        let status = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("interrupted, saving progress");
                    break RunStatus::Interrupted;
                }
                _ = checkpoint_tick.tick() => {
                    self.persist(&progress, &upstream.id).await;
                }
                next = pool.next() => {
                    let Some(done) = next else {
                        break RunStatus::Completed;
                    };
                    let counters = fold(&progress, done, scheduled);

                    let events = counters.rate_limit_events;
                    let every = opts.recheck_every.max(1);
                    if events / every > rechecked_at / every {
                        rechecked_at = events;
                        if self.budget_below_floor(&governor).await {
                            break RunStatus::PausedForBudget;
                        }
                    }
                }
            }
        };

        if status != RunStatus::Completed {
            pool_cancel.cancel();
            pool.abort();
        }
        self.persist(&progress, &upstream.id).await;

        let counters = progress.counters();
        let elapsed = started.elapsed();
        summarize(status, &counters, progress.records().len(), total, elapsed);

        Ok(RunReport {
            records: report::sort_by_activity(progress.records(), &discovery),
            upstream,
            status,
            counters,
            discovered: total,
            scheduled,
            elapsed,
        })
    }

    async fn budget_below_floor(&self, governor: &RateGovernor) -> bool {
        match governor.probe().await {
            Ok(budget) if budget.remaining < self.options.hard_floor => {
                warn!(
                    remaining = budget.remaining,
                    floor = self.options.hard_floor,
                    "rate budget nearly exhausted, stopping early"
                );
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(error = %e, "budget re-check failed, continuing");
                false
            }
        }
    }

    /// Writes the checkpoint on the blocking pool so workers keep running.
    async fn persist(&self, progress: &ProgressStore, repo: &RepoId) {
        let snapshot = progress.snapshot(repo);
        let store = self.checkpoints.clone();
        let repo = repo.clone();
        match tokio::task::spawn_blocking(move || store.save(&repo, &snapshot)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!(error = %e, "failed to save progress"),
            Err(e) => error!(error = %e, "checkpoint writer panicked"),
        }
    }
}

/// Runs `fut` unless `cancel` fires first.
async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

fn percent(done: u64, of: usize) -> f64 {
    if of == 0 {
        100.0
    } else {
        (done as f64 * 100.0 / of as f64).min(100.0)
    }
}

fn fold(progress: &ProgressStore, done: Completion, scheduled: usize) -> Counters {
    if done.outcome == TaskOutcome::AlreadyProcessed {
        return progress.counters();
    }
    let detail = match &done.outcome {
        TaskOutcome::Completed(r) => match (r.ahead_by, r.behind_by) {
            (Some(ahead), Some(behind)) => format!("ahead {ahead}, behind {behind}"),
            _ => String::new(),
        },
        TaskOutcome::Nonexistent => "gone, skipped".to_string(),
        TaskOutcome::SkippedNoDiff => "no diff, skipped".to_string(),
        TaskOutcome::Failed(e) => format!("failed: {e}"),
        TaskOutcome::AlreadyProcessed => String::new(),
    };
    let counters = progress.record(&done.name, done.outcome);
    info!(
        "processed {}/{} [{:.1}%] - {} {}",
        counters.processed,
        scheduled,
        percent(counters.processed, scheduled),
        done.name,
        detail
    );
    counters
}

fn summarize(status: RunStatus, c: &Counters, records: usize, total: usize, elapsed: Duration) {
    match status {
        RunStatus::Completed => info!(records, total, "all forks processed"),
        RunStatus::PausedForBudget => {
            warn!("progress saved; wait for the rate budget to reset, then rerun with --resume")
        }
        RunStatus::Interrupted => warn!("progress saved; rerun with --resume to continue"),
    }
    if c.nonexistent > 0 {
        info!(count = c.nonexistent, "forks no longer exist");
    }
    if c.skipped_no_diff > 0 {
        info!(count = c.skipped_no_diff, "forks without differences skipped");
    }
    if c.rate_limit_events > 0 {
        warn!(count = c.rate_limit_events, "rate limit events");
    }
    if c.errored > 0 {
        error!(count = c.errored, "forks failed");
    }
    let per_fork = if c.processed == 0 {
        0.0
    } else {
        elapsed.as_secs_f64() / c.processed as f64
    };
    info!(
        elapsed_secs = elapsed.as_secs_f64(),
        per_fork_secs = per_fork,
        "run finished"
    );
}
