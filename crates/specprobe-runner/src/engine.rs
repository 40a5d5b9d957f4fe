//! Probe engine: contract + policy + transport → run report

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use specprobe_core::{
    Attempt, Contract, ConfigError, ExecutionPlan, OperationDescriptor, PlanDecorator,
    ResponseValidator, RunPolicy, RunReport, SchemaRegistry, SchemaSampler, TestOutcome,
};

use crate::planner::RequestPlanner;
use crate::retry::RetryPolicy;
use crate::scheduler;
use crate::transport::{ReqwestTransport, Transport};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Runs every operation of a contract once against a live service.
pub struct ProbeEngine {
    policy: RunPolicy,
    transport: Arc<dyn Transport>,
    decorators: Vec<Arc<dyn PlanDecorator>>,
}

impl ProbeEngine {
    #[must_use]
    pub fn new(policy: RunPolicy, transport: Arc<dyn Transport>) -> Self {
        Self {
            policy,
            transport,
            decorators: Vec::new(),
        }
    }

    /// Engine over a [`ReqwestTransport`] honoring the policy timeout.
    ///
    /// # Errors
    ///
    /// Returns error if the policy is invalid or the HTTP client cannot be
    /// built
    pub fn with_reqwest(policy: RunPolicy) -> Result<Self, EngineError> {
        policy.validate()?;
        let transport = ReqwestTransport::new(policy.timeout())?;
        Ok(Self::new(policy, Arc::new(transport)))
    }

    /// Extra plan decorator, applied after policy headers and auth.
    #[must_use]
    pub fn with_decorator(mut self, decorator: Arc<dyn PlanDecorator>) -> Self {
        self.decorators.push(decorator);
        self
    }

    #[must_use]
    pub fn policy(&self) -> &RunPolicy {
        &self.policy
    }

    /// Build every plan without sending anything.
    ///
    /// # Errors
    ///
    /// Returns error if the policy or base URL is invalid
    pub fn plan(&self, contract: &Contract, base_url: &str) -> Result<Vec<ExecutionPlan>, EngineError> {
        self.policy.validate()?;
        let sampler = SchemaSampler::new(&contract.schemas, self.policy.sampler.clone());
        let mut planner = RequestPlanner::new(base_url, sampler)?
            .with_headers(self.policy.headers.clone())
            .with_path_values(self.policy.path_params.clone());
        if let Some(auth) = &self.policy.auth {
            planner = planner.with_decorator(Arc::new(auth.clone()));
        }
        for decorator in &self.decorators {
            planner = planner.with_decorator(Arc::clone(decorator));
        }
        Ok(planner.plan_all(&contract.operations))
    }

    /// Run to completion.
    ///
    /// # Errors
    ///
    /// Returns error if the policy or base URL is invalid; individual plan
    /// failures are reported in the [`RunReport`]
    pub async fn run(&self, contract: &Contract, base_url: &str) -> Result<RunReport, EngineError> {
        self.run_until(contract, base_url, &CancellationToken::new())
            .await
    }

    /// Run until finished or `cancel` fires. After cancellation no new plan is
    /// dispatched; plans in flight finish and are reported.
    ///
    /// # Errors
    ///
    /// Same as [`ProbeEngine::run`]
    pub async fn run_until(
        &self,
        contract: &Contract,
        base_url: &str,
        cancel: &CancellationToken,
    ) -> Result<RunReport, EngineError> {
        let plans = self.plan(contract, base_url)?;
        tracing::info!(
            plans = plans.len(),
            concurrency = self.policy.concurrency,
            max_retries = self.policy.max_retries,
            base_url,
            "probe run starting"
        );

        let ctx = Arc::new(ProbeContext {
            retry: RetryPolicy::from_run_policy(&self.policy),
            transport: Arc::clone(&self.transport),
            operations: contract.operations.clone(),
            schemas: contract.schemas.clone(),
            validate: self.policy.validate_responses,
            cancel: cancel.clone(),
        });

        let batch = scheduler::run(plans, self.policy.concurrency, cancel, |plan| {
            let ctx = Arc::clone(&ctx);
            async move { ctx.probe(plan).await }
        })
        .await;

        let cancelled = batch.cancelled();
        let report = RunReport::new(batch.outcomes, cancelled);
        tracing::info!(
            total = report.summary.total,
            passed = report.summary.passed,
            failed = report.summary.failed,
            cancelled = report.cancelled,
            "probe run finished"
        );
        Ok(report)
    }
}

/// Shared, read-only state for plan tasks.
struct ProbeContext {
    retry: RetryPolicy,
    transport: Arc<dyn Transport>,
    operations: Vec<OperationDescriptor>,
    schemas: SchemaRegistry,
    validate: bool,
    cancel: CancellationToken,
}

impl ProbeContext {
    async fn probe(&self, plan: ExecutionPlan) -> TestOutcome {
        let attempts = self
            .retry
            .execute(&plan, self.transport.as_ref(), &self.cancel)
            .await;

        let validation = if self.validate {
            attempts
                .last()
                .zip(self.operations.get(plan.index))
                .and_then(|(attempt, op)| {
                    ResponseValidator::new(&self.schemas).validate_attempt(attempt, op)
                })
        } else {
            None
        };

        let max_attempts = usize::try_from(self.retry.max_retries)
            .unwrap_or(usize::MAX)
            .saturating_add(1);
        let stopped_early = self.cancel.is_cancelled()
            && attempts.len() < max_attempts
            && attempts.last().is_some_and(Attempt::is_retryable);

        let mut outcome = TestOutcome::from_attempts(plan.label(), attempts, validation);
        if stopped_early {
            outcome.message.push_str("; retries stopped by cancellation");
        }
        tracing::debug!(
            index = outcome.index,
            label = %outcome.label(),
            status = %outcome.final_status,
            passed = outcome.passed(),
            "plan finished"
        );
        outcome
    }
}
