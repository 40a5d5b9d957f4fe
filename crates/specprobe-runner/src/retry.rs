//! Per-plan retry loop with exponential backoff
//!
//! Only transport failures of a retryable kind are retried. Any HTTP status,
//! 4xx and 5xx included, ends the loop.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use specprobe_core::{
    Attempt, AttemptOutcome, ExecutionPlan, RunPolicy, TransportError, TransportErrorKind,
};

use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Bound on a single send
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_run_policy(&RunPolicy::default())
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_run_policy(policy: &RunPolicy) -> Self {
        Self {
            max_retries: policy.max_retries,
            base_delay: policy.base_delay(),
            max_delay: policy.max_delay(),
            timeout: policy.timeout(),
        }
    }

    /// Delay before attempt `attempt` (1-indexed): zero for the first, then
    /// `min(base * 2^(attempt - 2), max)`, saturating.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.checked_pow(attempt - 2).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }

    /// Run `plan` until a terminal result, exhaustion or cancellation.
    ///
    /// Returns 1..=`max_retries + 1` attempts. Cancellation interrupts a
    /// backoff sleep but never an in-flight send.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        transport: &dyn Transport,
        cancel: &CancellationToken,
    ) -> Vec<Attempt> {
        let started = Instant::now();
        let mut attempts: Vec<Attempt> = Vec::new();
        let max_attempts = self.max_retries.saturating_add(1);

        for number in 1..=max_attempts {
            if number > 1 {
                let delay = self.delay_before(number);
                tracing::warn!(
                    index = plan.index,
                    method = %plan.method,
                    url = %plan.url,
                    attempt = number,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "retrying after transport failure"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        tracing::debug!(index = plan.index, "retry cancelled during backoff");
                        break;
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }

            let offset = started.elapsed();
            let sent_at = Instant::now();
            let result = match tokio::time::timeout(self.timeout, transport.send(plan)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::new(
                    TransportErrorKind::Timeout,
                    format!("no response within {} ms", self.timeout.as_millis()),
                )),
            };
            let attempt = Attempt {
                number,
                offset,
                elapsed: sent_at.elapsed(),
                outcome: AttemptOutcome::from(result),
            };
            tracing::debug!(
                index = plan.index,
                attempt = number,
                outcome = ?attempt.response().map(|r| r.status),
                "attempt finished"
            );

            let retry = attempt.is_retryable();
            attempts.push(attempt);
            if !retry {
                break;
            }
        }

        attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedTransport, refused};
    use specprobe_core::ResponseData;
    use std::collections::BTreeMap;

    fn plan() -> ExecutionPlan {
        ExecutionPlan {
            index: 0,
            method: "GET".into(),
            endpoint: "/posts/{id}".into(),
            url: "http://localhost/posts/1".into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn delay_law() {
        let p = policy(10);
        assert_eq!(p.delay_before(1), Duration::ZERO);
        assert_eq!(p.delay_before(2), Duration::from_millis(100));
        assert_eq!(p.delay_before(3), Duration::from_millis(200));
        assert_eq!(p.delay_before(4), Duration::from_millis(400));
        assert_eq!(p.delay_before(9), Duration::from_millis(10_000));
    }

    #[test]
    fn delay_saturates() {
        let p = policy(u32::MAX);
        assert_eq!(p.delay_before(u32::MAX), Duration::from_secs(10));
        let unbounded = RetryPolicy {
            base_delay: Duration::from_secs(u64::MAX / 2),
            max_delay: Duration::MAX,
            ..p
        };
        assert_eq!(unbounded.delay_before(4), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_between_transport_failures() {
        let transport = ScriptedTransport::new(vec![
            Err(refused()),
            Err(refused()),
            Ok(ResponseData::new(200)),
        ]);
        let attempts = policy(3)
            .execute(&plan(), &transport, &CancellationToken::new())
            .await;

        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[2].response().map(|r| r.status), Some(200));
        let first_gap = attempts[1].offset - attempts[0].end();
        let second_gap = attempts[2].offset - attempts[1].end();
        assert!(first_gap >= Duration::from_millis(100), "{first_gap:?}");
        assert!(second_gap >= Duration::from_millis(200), "{second_gap:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn http_errors_are_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok(ResponseData::new(404))]);
        let attempts = policy(3)
            .execute(&plan(), &transport, &CancellationToken::new())
            .await;
        assert_eq!(attempts.len(), 1);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn server_errors_are_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok(ResponseData::new(503))]);
        let attempts = policy(3)
            .execute(&plan(), &transport, &CancellationToken::new())
            .await;
        assert_eq!(attempts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_stops_at_max_retries() {
        let transport = ScriptedTransport::repeating(Err(refused()));
        let attempts = policy(2)
            .execute(&plan(), &transport, &CancellationToken::new())
            .await;
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(Attempt::is_retryable));
        let numbers: Vec<u32> = attempts.iter().map(|a| a.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_one_attempt() {
        let transport = ScriptedTransport::repeating(Err(refused()));
        let attempts = policy(0)
            .execute(&plan(), &transport, &CancellationToken::new())
            .await;
        assert_eq!(attempts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn request_errors_are_terminal() {
        let transport = ScriptedTransport::repeating(Err(TransportError::new(
            TransportErrorKind::Request,
            "bad header",
        )));
        let attempts = policy(3)
            .execute(&plan(), &transport, &CancellationToken::new())
            .await;
        assert_eq!(attempts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_send_times_out() {
        let transport = ScriptedTransport::hanging();
        let attempts = RetryPolicy {
            timeout: Duration::from_millis(250),
            ..policy(1)
        }
        .execute(&plan(), &transport, &CancellationToken::new())
        .await;

        assert_eq!(attempts.len(), 2);
        assert!(matches!(
            attempts[0].outcome,
            AttemptOutcome::TransportError {
                kind: TransportErrorKind::Timeout,
                ..
            }
        ));
        assert!(attempts[0].elapsed >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_stops_retrying() {
        let cancel = CancellationToken::new();
        let transport = ScriptedTransport::repeating(Err(refused()));
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let attempts = policy(5).execute(&plan(), &transport, &cancel).await;
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].is_retryable());
    }
}
