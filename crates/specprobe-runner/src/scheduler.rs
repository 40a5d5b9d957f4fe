//! Bounded dispatch of plans onto the tokio runtime
//!
//! `limit <= 1` runs plans strictly in order. Otherwise up to `limit` plans are
//! in flight; a slot is refilled as soon as any plan completes and outcomes are
//! collected in completion order. Cancellation stops dispatch; plans already
//! dispatched run to completion.

use std::collections::BTreeMap;
use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use specprobe_core::{ExecutionPlan, PlanLabel, TestOutcome};

/// Everything the scheduler collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// One per dispatched plan
    pub outcomes: Vec<TestOutcome>,
    /// Plans never dispatched because of cancellation
    pub skipped: usize,
}

impl Batch {
    #[must_use]
    pub fn cancelled(&self) -> bool {
        self.skipped > 0
    }
}

/// Run every plan through `execute`, at most `limit` at a time.
pub async fn run<F, Fut>(
    plans: Vec<ExecutionPlan>,
    limit: usize,
    cancel: &CancellationToken,
    mut execute: F,
) -> Batch
where
    F: FnMut(ExecutionPlan) -> Fut,
    Fut: Future<Output = TestOutcome> + Send + 'static,
{
    if limit <= 1 {
        return run_sequential(plans, cancel, execute).await;
    }

    let total = plans.len();
    let mut queue = plans.into_iter();
    let mut set: JoinSet<TestOutcome> = JoinSet::new();
    let mut in_flight: BTreeMap<usize, PlanLabel> = BTreeMap::new();
    let mut outcomes = Vec::with_capacity(total);

    loop {
        while set.len() < limit && !cancel.is_cancelled() {
            let Some(plan) = queue.next() else {
                break;
            };
            let label = plan.label();
            in_flight.insert(label.index, label.clone());
            set.spawn(guarded(label, execute(plan)));
        }

        match set.join_next().await {
            Some(Ok(outcome)) => {
                in_flight.remove(&outcome.index);
                outcomes.push(outcome);
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, "scheduler task failed");
            }
            None => break,
        }
    }

    // A task that died without reporting still owes an outcome
    for label in in_flight.into_values() {
        outcomes.push(TestOutcome::aborted(label, "task ended without reporting"));
    }

    let skipped = queue.len();
    if skipped > 0 {
        tracing::info!(skipped, "cancelled, remaining plans not dispatched");
    }
    Batch { outcomes, skipped }
}

async fn run_sequential<F, Fut>(
    plans: Vec<ExecutionPlan>,
    cancel: &CancellationToken,
    mut execute: F,
) -> Batch
where
    F: FnMut(ExecutionPlan) -> Fut,
    Fut: Future<Output = TestOutcome> + Send + 'static,
{
    let mut outcomes = Vec::with_capacity(plans.len());
    let mut queue = plans.into_iter();
    while !cancel.is_cancelled() {
        let Some(plan) = queue.next() else {
            break;
        };
        let label = plan.label();
        outcomes.push(guarded(label, execute(plan)).await);
    }

    let skipped = queue.len();
    if skipped > 0 {
        tracing::info!(skipped, "cancelled, remaining plans not dispatched");
    }
    Batch { outcomes, skipped }
}

/// Run one plan in its own task so a panic becomes an `ERR` outcome.
async fn guarded<Fut>(label: PlanLabel, fut: Fut) -> TestOutcome
where
    Fut: Future<Output = TestOutcome> + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::warn!(
                index = label.index,
                method = %label.method,
                endpoint = %label.endpoint,
                error = %err,
                "plan task failed"
            );
            let reason = if err.is_panic() { "task panicked" } else { "task cancelled" };
            TestOutcome::aborted(label, reason)
        }
    }
}
