//! Run report interchange format for external reporters

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::TestOutcome;
use crate::summary::{Summary, aggregate};

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RunReport {
    /// One per dispatched plan, in completion order
    pub outcomes: Vec<TestOutcome>,
    pub summary: Summary,
    /// Set when cancellation left some plans undispatched
    pub cancelled: bool,
}

impl RunReport {
    #[must_use]
    pub fn new(outcomes: Vec<TestOutcome>, cancelled: bool) -> Self {
        let summary = aggregate(&outcomes);
        Self {
            outcomes,
            summary,
            cancelled,
        }
    }

    /// Outcomes sorted by submission index.
    #[must_use]
    pub fn sorted_outcomes(&self) -> Vec<&TestOutcome> {
        let mut sorted: Vec<&TestOutcome> = self.outcomes.iter().collect();
        sorted.sort_by_key(|o| o.index);
        sorted
    }
}

/// JSON Schema for [`RunReport`].
#[must_use]
pub fn generate_schema() -> serde_json::Value {
    schemars::schema_for!(RunReport).into()
}

/// Pretty-printed [`generate_schema`].
#[must_use]
pub fn generate_schema_string() -> String {
    format!("{:#}", generate_schema())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attempt, AttemptOutcome, PlanLabel, ResponseData};
    use std::time::Duration;

    fn outcome(index: usize, status: u16) -> TestOutcome {
        TestOutcome::from_attempts(
            PlanLabel {
                index,
                method: "GET".into(),
                endpoint: "/health".into(),
                url: "http://localhost/health".into(),
            },
            vec![Attempt {
                number: 1,
                offset: Duration::ZERO,
                elapsed: Duration::from_millis(3),
                outcome: AttemptOutcome::Response(ResponseData::new(status)),
            }],
            None,
        )
    }

    #[test]
    fn report_summarizes_outcomes() {
        let report = RunReport::new(vec![outcome(1, 500), outcome(0, 200)], false);
        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.passed, 1);
        let order: Vec<usize> = report.sorted_outcomes().iter().map(|o| o.index).collect();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn report_round_trips_through_json() {
        let report = RunReport::new(vec![outcome(0, 204)], true);
        let json = serde_json::to_string(&report).unwrap();
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn err_status_serializes_as_literal() {
        let aborted = TestOutcome::aborted(
            PlanLabel {
                index: 0,
                method: "GET".into(),
                endpoint: "/x".into(),
                url: "http://localhost/x".into(),
            },
            "task panicked",
        );
        let value = serde_json::to_value(&aborted).unwrap();
        assert_eq!(value["final_status"], "ERR");
        assert_eq!(value["attempts"][0]["outcome"]["type"], "transport_error");
        assert_eq!(value["attempts"][0]["outcome"]["kind"], "aborted");
    }

    #[test]
    fn schema_generation_produces_valid_json() {
        let parsed: serde_json::Value = serde_json::from_str(&generate_schema_string()).unwrap();
        assert_eq!(
            parsed.get("title").and_then(|v| v.as_str()),
            Some("RunReport")
        );
        assert!(parsed.pointer("/properties/summary").is_some());
    }
}
