use crate::engine::task::{ForkTask, TaskContext, TaskOutcome};
use crate::github::types::RemoteRepo;
use futures::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

#[derive(Debug)]
pub struct Completion {
    pub name: String,
    pub outcome: TaskOutcome,
}

/// Fixed number of workers draining a shared queue of forks.
///
/// Completions arrive in finishing order. Dropping the pool aborts any task
/// still in flight.
pub struct WorkerPool {
    workers: JoinSet<()>,
    completions: mpsc::UnboundedReceiver<Completion>,
}

impl WorkerPool {
    pub fn start(
        width: usize,
        forks: Vec<RemoteRepo>,
        ctx: Arc<TaskContext>,
        cancel: CancellationToken,
    ) -> Self {
        let queue = Arc::new(Mutex::new(VecDeque::from(forks)));
        let (tx, completions) = mpsc::unbounded_channel();
        let mut workers = JoinSet::new();

        for worker in 0..width.max(1) {
            let queue = queue.clone();
            let ctx = ctx.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();
            workers.spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let next = queue
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .pop_front();
                    let Some(fork) = next else {
                        break;
                    };
                    let outcome = run_guarded(&ctx, &fork).await;
                    let done = Completion {
                        name: fork.full_name(),
                        outcome,
                    };
                    if tx.send(done).is_err() {
                        break;
                    }
                }
                debug!(worker, "worker finished");
            });
        }

        Self {
            workers,
            completions,
        }
    }

    /// Next finished task, or `None` once every worker has exited.
    pub async fn next(&mut self) -> Option<Completion> {
        self.completions.recv().await
    }

    pub fn abort(&mut self) {
        self.workers.abort_all();
    }
}

/// Runs one task, turning a panic into a failed outcome so the run carries on.
async fn run_guarded(ctx: &TaskContext, fork: &RemoteRepo) -> TaskOutcome {
    match AssertUnwindSafe(ForkTask::new(ctx, fork).run())
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "task panicked".to_string());
            error!(fork = %fork.id, error = %msg, "fork task failed");
            TaskOutcome::Failed(msg)
        }
    }
}
