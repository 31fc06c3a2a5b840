//! Shared gate in front of the remote request budget.
//!
//! The gate is a two-state machine, `Open` or `Closed { until }`, published
//! through a `watch` channel. Any caller may close it; every caller, including
//! ones that arrive later, parks until the deadline passes. Whoever observes
//! an expired deadline reopens it, so a cancelled closer can never leave the
//! gate shut.

use crate::github::host::ForkHost;
use crate::github::types::{RateBudget, RemoteError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_SAFETY_THRESHOLD: u32 = 100;
const RESET_MARGIN: Duration = Duration::from_secs(1);
const FORBIDDEN_WAIT: Duration = Duration::from_secs(60 * 60);
const QUERY_FAILURE_WAIT: Duration = Duration::from_secs(5 * 60);
const COUNTDOWN_TICK: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    Open,
    Closed { until: Instant },
}

pub struct RateGovernor {
    host: Arc<dyn ForkHost>,
    gate: watch::Sender<Gate>,
    safety_threshold: u32,
}

impl RateGovernor {
    pub fn new(host: Arc<dyn ForkHost>, safety_threshold: u32) -> Self {
        let (gate, _) = watch::channel(Gate::Open);
        Self {
            host,
            gate,
            safety_threshold,
        }
    }

    pub fn gate(&self) -> Gate {
        *self.gate.borrow()
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.gate(), Gate::Closed { .. })
    }

    /// Passes through the gate and returns a budget that is at or above the
    /// safety threshold, closing the gate until the window resets otherwise.
    pub async fn acquire(&self) -> RateBudget {
        self.check(false).await
    }

    /// Like [`acquire`](Self::acquire), but closes the gate until the next
    /// reset regardless of the reported budget.
    pub async fn force_wait(&self) -> RateBudget {
        self.check(true).await
    }

    /// Queries the budget without touching the gate.
    pub async fn probe(&self) -> Result<RateBudget, RemoteError> {
        self.host.rate_budget().await
    }

    async fn check(&self, mut force: bool) -> RateBudget {
        loop {
            self.wait_open().await;

            let budget = match self.host.rate_budget().await {
                Ok(budget) => budget,
                Err(RemoteError::Forbidden(msg)) => {
                    warn!(error = %msg, "budget query forbidden, backing off");
                    self.pause_for(FORBIDDEN_WAIT, "access forbidden").await;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "could not query rate budget, waiting conservatively");
                    sleep(QUERY_FAILURE_WAIT).await;
                    return RateBudget::exhausted();
                }
            };

            if budget.remaining >= self.safety_threshold && !force {
                return budget;
            }
            force = false;

            warn!(
                remaining = budget.remaining,
                reset_at = %budget.reset_at,
                "rate budget nearly spent, pausing all workers"
            );
            self.pause_for(budget.until_reset() + RESET_MARGIN, "rate budget exhausted")
                .await;
        }
    }

    /// Closes the gate for at least `duration` and waits until it reopens.
    pub async fn pause_for(&self, duration: Duration, reason: &str) {
        let until = Instant::now() + duration;
        if self.close_until(until) {
            self.hold(reason).await;
        } else {
            self.wait_open().await;
        }
    }

    /// Closes or extends the gate. Returns true if the gate was open before.
    fn close_until(&self, until: Instant) -> bool {
        let mut opened_by_us = false;
        self.gate.send_if_modified(|gate| match *gate {
            Gate::Open => {
                *gate = Gate::Closed { until };
                opened_by_us = true;
                true
            }
            Gate::Closed { until: current } if until > current => {
                *gate = Gate::Closed { until };
                true
            }
            Gate::Closed { .. } => false,
        });
        opened_by_us
    }

    /// Keeps the gate closed until its deadline, logging a countdown.
    async fn hold(&self, reason: &str) {
        let started = Instant::now();
        loop {
            let until = match self.gate() {
                Gate::Open => return,
                Gate::Closed { until } => until,
            };
            let now = Instant::now();
            if now >= until {
                self.reopen_if_due();
                return;
            }
            let remaining = until - now;
            info!(
                reason,
                elapsed_secs = (now - started).as_secs(),
                remaining_secs = remaining.as_secs(),
                "waiting for rate budget"
            );
            sleep(remaining.min(COUNTDOWN_TICK)).await;
        }
    }

    /// Parks the caller until the gate is open.
    pub async fn wait_open(&self) {
        let mut rx = self.gate.subscribe();
        loop {
            let until = match *rx.borrow_and_update() {
                Gate::Open => return,
                Gate::Closed { until } => until,
            };
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = sleep_until(until) => self.reopen_if_due(),
            }
        }
    }

    fn reopen_if_due(&self) {
        let now = Instant::now();
        let reopened = self.gate.send_if_modified(|gate| match *gate {
            Gate::Closed { until } if until <= now => {
                *gate = Gate::Open;
                true
            }
            _ => false,
        });
        if reopened {
            debug!("rate gate reopened");
        }
    }
}
