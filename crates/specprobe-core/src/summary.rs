//! Outcome aggregation: pass/fail counts, timing and status distribution
//!
//! A pure fold over [`TestOutcome`]s. The result is independent of input order
//! (outcomes arrive in completion order); per-outcome entries are sorted by
//! submission index.

use std::collections::BTreeMap;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::{FinalStatus, TestOutcome};

// ── Data types ──

/// Pass/fail line for one outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OutcomeVerdict {
    pub index: usize,
    /// Operation label, e.g. "GET /posts/{id}"
    pub label: String,
    pub final_status: FinalStatus,
    pub passed: bool,
    pub retry_count: u32,
    pub duration: Duration,
}

/// Totals over a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Summary {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    /// Sum of per-outcome durations
    pub total_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub mean_duration: Duration,
    /// Final status ("200", "ERR", ...) → count
    pub status_counts: BTreeMap<String, u64>,
    /// Sorted by submission index
    pub per_outcome: Vec<OutcomeVerdict>,
}

impl Summary {
    /// Fraction of passed outcomes (0.0–1.0); 0.0 for an empty run.
    #[must_use]
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.total > 0 && self.failed == 0
    }
}

// ── Computation ──

/// Fold outcomes into a [`Summary`].
#[must_use]
pub fn aggregate(outcomes: &[TestOutcome]) -> Summary {
    let mut status_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut per_outcome = Vec::with_capacity(outcomes.len());
    let mut total_duration = Duration::ZERO;

    for outcome in outcomes {
        *status_counts
            .entry(outcome.final_status.to_string())
            .or_default() += 1;
        total_duration = total_duration.saturating_add(outcome.duration);
        per_outcome.push(OutcomeVerdict {
            index: outcome.index,
            label: outcome.label(),
            final_status: outcome.final_status,
            passed: outcome.passed(),
            retry_count: outcome.retry_count,
            duration: outcome.duration,
        });
    }
    per_outcome.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.label.cmp(&b.label)));

    let total = per_outcome.len() as u64;
    let passed = per_outcome.iter().filter(|v| v.passed).count() as u64;
    let min_duration = per_outcome
        .iter()
        .map(|v| v.duration)
        .min()
        .unwrap_or_default();
    let max_duration = per_outcome
        .iter()
        .map(|v| v.duration)
        .max()
        .unwrap_or_default();
    let mean_duration = u32::try_from(per_outcome.len())
        .ok()
        .filter(|n| *n > 0)
        .map(|n| total_duration / n)
        .unwrap_or_default();

    Summary {
        total,
        passed,
        failed: total - passed,
        total_duration,
        min_duration,
        max_duration,
        mean_duration,
        status_counts,
        per_outcome,
    }
}
