//! Bounded retry and the plan/execute/synthesize pipeline
//!
//! Every operation that talks to the completion endpoint runs inside a
//! bounded retry block: transient failures (parse, completion) are retried
//! up to the configured attempt count, anything else aborts the block at
//! once. An exhausted block yields `None` and the caller substitutes the
//! locale's fixed fallback string — errors never cross the public surface.
//!
//! The two synthesis operations (report generation, data analysis) share
//! one shape: plan sub-tasks, run each sub-task conversation, accumulate
//! the function output, trim it under the flow's token ceiling, then ask
//! the analyst to synthesize. `run_flow` owns that shape; the flows supply
//! the conversations.

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::agents::strip_sentinel;
use crate::core::budget::AccumulatedContext;
use crate::core::extract::TaskDemand;
use crate::core::llm::ChatMessage;
use crate::error::Result;

/// Why a bounded-retry block gave up. Exhaustion maps to the locale's
/// timeout message; a terminal failure maps to the flow's own failure
/// string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryFailure {
    /// Every attempt failed with a retryable error.
    Exhausted,
    /// An attempt failed with an error another attempt cannot fix.
    Terminal,
}

/// Run `attempt` up to `max_attempts` times, stopping early on a
/// non-retryable error. Failures are logged against the requesting user;
/// what to tell them is the caller's problem.
pub async fn with_retry<'a, T>(
    max_attempts: usize,
    user: &str,
    what: &str,
    mut attempt: impl FnMut() -> BoxFuture<'a, Result<T>>,
) -> std::result::Result<T, RetryFailure> {
    for round in 1..=max_attempts.max(1) {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                tracing::warn!("[{user}] {what} attempt {round}/{max_attempts} failed: {err}");
            }
            Err(err) => {
                tracing::error!("[{user}] {what} failed terminally: {err}");
                return Err(RetryFailure::Terminal);
            }
        }
    }
    tracing::warn!("[{user}] {what} exhausted its {max_attempts} attempts");
    Err(RetryFailure::Exhausted)
}

/// One plan/execute/synthesize operation.
#[async_trait]
pub trait SynthesisFlow: Send + Sync {
    /// Flow label for logs.
    fn name(&self) -> &'static str;

    /// Token ceiling the accumulated context must fit under.
    fn ceiling(&self) -> usize;

    /// Model id used for token counting.
    fn model(&self) -> &str;

    /// Split the user's request into sub-tasks.
    async fn plan(&self) -> Result<Vec<TaskDemand>>;

    /// Run one sub-task conversation; returns the messages worth keeping
    /// for synthesis (typically the function results).
    async fn run_sub_task(&self, demand: &TaskDemand) -> Result<Vec<ChatMessage>>;

    /// Produce the final answer from the trimmed context.
    async fn synthesize(&self, context: &AccumulatedContext) -> Result<String>;

    /// What the user sees when the context cannot fit the ceiling.
    fn budget_exhausted_message(&self) -> &'static str;

    /// What the user sees when the flow fails for a reason a retry
    /// cannot fix.
    fn failure_message(&self) -> &'static str;
}

/// Limits shared by every flow invocation.
#[derive(Debug, Clone, Copy)]
pub struct FlowLimits {
    pub max_retry_times: usize,
}

/// Drive a flow end to end. Always returns user-facing text: the
/// synthesized answer on success, the timeout string when a retry block
/// exhausts, the flow's failure message on a terminal error, the flow's
/// budget message when trimming fails.
pub async fn run_flow(
    flow: &dyn SynthesisFlow,
    limits: FlowLimits,
    user: &str,
    timeout_message: &str,
) -> String {
    use futures::FutureExt;

    let retries = limits.max_retry_times;
    let fallback = |failure: RetryFailure| match failure {
        RetryFailure::Exhausted => timeout_message.to_string(),
        RetryFailure::Terminal => flow.failure_message().to_string(),
    };
    tracing::info!("[{user}] starting {} flow", flow.name());

    let demands = match with_retry(retries, user, "planning", || flow.plan().boxed()).await {
        Ok(demands) => demands,
        Err(failure) => return fallback(failure),
    };
    tracing::info!("[{user}] {} planned {} sub-task(s)", flow.name(), demands.len());

    let mut context = AccumulatedContext::new(flow.ceiling(), flow.model());
    for demand in &demands {
        let label = format!("sub-task '{}'", demand.name);
        let messages =
            match with_retry(retries, user, &label, || flow.run_sub_task(demand).boxed()).await {
                Ok(messages) => messages,
                Err(failure) => return fallback(failure),
            };
        for message in messages {
            context.push(message);
        }
    }

    match context.trim_to_fit() {
        Ok(evicted) if evicted > 0 => {
            tracing::warn!(
                "[{user}] {} trimmed {evicted} sub-task result(s) to fit {} tokens",
                flow.name(),
                flow.ceiling()
            );
        }
        Ok(_) => {}
        Err(err) => {
            tracing::error!("[{user}] {} context unusable: {err}", flow.name());
            return flow.budget_exhausted_message().to_string();
        }
    }

    match with_retry(retries, user, "synthesis", || flow.synthesize(&context).boxed()).await {
        Ok(answer) => strip_sentinel(&answer),
        Err(failure) => fallback(failure),
    }
}
