//! Single-task execution: condition, plugin resolution, attempts, failure policy.
//!
//! `TaskExecutor` runs one task of one execution to a terminal state. It is
//! shared by reference across the orchestrator's spawned tasks and keeps no
//! per-execution state of its own; the only cross-execution state it touches
//! is the circuit breaker table.
//!
//! # Flow
//!
//! 1. Evaluate `when` (unless the orchestrator already did). Falsy skips the
//!    task, recorded as `Canceled`.
//! 2. Check the circuit breaker when the task's failure policy is
//!    `circuitBreaker`.
//! 3. Resolve the plugin through the [`PluginHost`] and check the manifest
//!    lists the operation. Resolution errors are fatal and never retried.
//! 4. Invoke up to `maxAttempts` times, each bounded by the task timeout,
//!    sleeping the backoff delay between attempts.
//! 5. Apply the failure policy once attempts are exhausted.
//!
//! The task row is written before and after every attempt.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flowforge_types::error::RepositoryError;
use flowforge_types::execution::{TaskStatus, WorkflowTaskExecution};
use flowforge_types::workflow::{FailurePolicy, WorkflowTask};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::plugin::{PluginError, PluginHost, PluginLease};
use crate::repository::WorkflowRepository;

use super::circuit::{CircuitBreakers, CircuitKey};
use super::condition::{self, ConditionError};
use super::context::ExecutionScope;
use super::retry::{backoff_delay, should_retry};

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

/// Why a task ended `Failed`.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error(transparent)]
    Condition(#[from] ConditionError),

    #[error("plugin resolution failed: {0}")]
    Resolution(PluginError),

    #[error("attempt timed out after {0} ms")]
    Timeout(u64),

    #[error("{0}")]
    Invocation(PluginError),

    #[error("circuit open, retry in {0} ms")]
    CircuitOpen(u64),

    #[error("fallback '{operation}' failed: {source}")]
    Fallback {
        operation: String,
        source: Box<TaskError>,
    },
}

/// Terminal result of one task.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub output: Option<Value>,
    pub attempts: u32,
    pub error: Option<TaskError>,
    /// `true` when the condition evaluated false.
    pub skipped: bool,
}

impl TaskOutcome {
    fn completed(output: Value, attempts: u32) -> Self {
        Self {
            status: TaskStatus::Completed,
            output: Some(output),
            attempts,
            error: None,
            skipped: false,
        }
    }

    fn failed(error: TaskError, attempts: u32) -> Self {
        Self {
            status: TaskStatus::Failed,
            output: None,
            attempts,
            error: Some(error),
            skipped: false,
        }
    }

    fn skipped() -> Self {
        Self {
            status: TaskStatus::Canceled,
            output: None,
            attempts: 0,
            error: None,
            skipped: true,
        }
    }
}

/// Input for [`TaskExecutor::execute`].
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub scope: ExecutionScope,
    pub task: WorkflowTask,
    /// Snapshot of the expression context taken at dispatch.
    pub condition_context: Value,
    /// Set when the caller already evaluated `when` to true.
    pub condition_checked: bool,
}

// ---------------------------------------------------------------------------
// TaskExecutor
// ---------------------------------------------------------------------------

pub struct TaskExecutor<R: WorkflowRepository> {
    repo: Arc<R>,
    plugins: Arc<PluginHost>,
    breakers: Arc<CircuitBreakers>,
}

impl<R: WorkflowRepository> TaskExecutor<R> {
    pub fn new(repo: Arc<R>, plugins: Arc<PluginHost>) -> Self {
        Self {
            repo,
            plugins,
            breakers: Arc::new(CircuitBreakers::new()),
        }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    /// Run `request.task` to a terminal state.
    ///
    /// Task-level failures are reported in the outcome; only repository
    /// errors are returned as `Err`.
    pub async fn execute(&self, request: TaskRequest) -> Result<TaskOutcome, RepositoryError> {
        let TaskRequest {
            scope,
            task,
            condition_context,
            condition_checked,
        } = request;
        let mut row = WorkflowTaskExecution::new(scope.execution_id, &task.name);

        if !condition_checked && let Some(expr) = &task.when {
            match condition::evaluate(expr, &condition_context) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(task = %task.name, condition = %expr, "condition false, skipping task");
                    row.status = TaskStatus::Canceled;
                    row.message = Some(format!("skipped: condition '{expr}' evaluated false"));
                    row.end_time = Some(Utc::now());
                    self.repo.upsert_task_execution(&row).await?;
                    return Ok(TaskOutcome::skipped());
                }
                Err(e) => {
                    let outcome = TaskOutcome::failed(TaskError::Condition(e), 0);
                    return self.finish(row, outcome).await;
                }
            }
        }

        let policy = task.failure_policy();
        let mut permit = match &policy {
            FailurePolicy::CircuitBreaker {
                failure_threshold,
                cooldown,
            } => {
                let key = CircuitKey::new(scope.workflow_id, task.name.clone());
                match self.breakers.acquire(
                    key,
                    *failure_threshold,
                    Duration::from_millis(*cooldown),
                ) {
                    Ok(permit) => Some(permit),
                    Err(remaining) => {
                        let remaining_ms = remaining.as_millis() as u64;
                        tracing::warn!(task = %task.name, remaining_ms, "circuit open");
                        let outcome = TaskOutcome::failed(TaskError::CircuitOpen(remaining_ms), 0);
                        return self.finish(row, outcome).await;
                    }
                }
            }
            _ => None,
        };

        row.status = TaskStatus::Running;
        row.start_time = Some(Utc::now());
        self.repo.upsert_task_execution(&row).await?;

        let lease = match self
            .plugins
            .resolve(&scope.user_id, &task.plugin_ref, &task.parameters)
            .await
            .and_then(|lease| check_operation(lease, task.operation()))
        {
            Ok(lease) => lease,
            Err(e) => {
                tracing::error!(task = %task.name, plugin = %task.plugin_ref, error = %e, "plugin resolution failed");
                if let Some(permit) = permit.take() {
                    permit.failure();
                }
                return self
                    .finish(row, TaskOutcome::failed(TaskError::Resolution(e), 0))
                    .await;
            }
        };

        let max_attempts = task.max_attempts();
        let mut attempt = 0;
        let mut last_error = None;
        while attempt < max_attempts {
            attempt += 1;
            row.attempts = attempt;
            if attempt > 1 {
                row.status = TaskStatus::Retrying;
                self.repo.upsert_task_execution(&row).await?;
            }

            match invoke_once(&lease, task.operation(), &task.parameters, task.timeout).await {
                Ok(output) => {
                    if let Some(permit) = permit.take() {
                        permit.success();
                    }
                    tracing::debug!(task = %task.name, attempt, "task completed");
                    row.message = None;
                    return self.finish(row, TaskOutcome::completed(output, attempt)).await;
                }
                Err(e) => {
                    tracing::warn!(task = %task.name, attempt, max_attempts, error = %e, "task attempt failed");
                    row.message = Some(e.to_string());
                    self.repo.upsert_task_execution(&row).await?;
                    last_error = Some(e);

                    if should_retry(task.retry.as_ref(), attempt)
                        && let Some(retry) = &task.retry
                    {
                        let wait = backoff_delay(retry, attempt);
                        if !wait.is_zero() {
                            tokio::time::sleep(wait).await;
                        }
                    }
                }
            }
        }

        let Some(error) = last_error else {
            // max_attempts is never zero, so the loop ran at least once.
            return self
                .finish(row, TaskOutcome::failed(TaskError::Timeout(0), attempt))
                .await;
        };

        let outcome = match &policy {
            FailurePolicy::Propagate => TaskOutcome::failed(error, attempt),
            FailurePolicy::Fallback {
                operation,
                parameters,
            } => {
                let params = if parameters.is_empty() {
                    &task.parameters
                } else {
                    parameters
                };
                match invoke_once(&lease, operation, params, task.timeout).await {
                    Ok(output) => {
                        tracing::info!(task = %task.name, fallback = %operation, "fallback succeeded");
                        row.message = Some(format!("completed via fallback '{operation}' after: {error}"));
                        TaskOutcome::completed(output, attempt)
                    }
                    Err(e) => TaskOutcome::failed(
                        TaskError::Fallback {
                            operation: operation.clone(),
                            source: Box::new(e),
                        },
                        attempt,
                    ),
                }
            }
            FailurePolicy::CircuitBreaker { .. } => {
                if let Some(permit) = permit.take() {
                    permit.failure();
                }
                TaskOutcome::failed(error, attempt)
            }
        };

        self.finish(row, outcome).await
    }

    async fn finish(
        &self,
        mut row: WorkflowTaskExecution,
        outcome: TaskOutcome,
    ) -> Result<TaskOutcome, RepositoryError> {
        row.status = outcome.status;
        row.attempts = outcome.attempts;
        if let Some(error) = &outcome.error {
            row.message = Some(error.to_string());
        }
        row.end_time = Some(Utc::now());
        self.repo.upsert_task_execution(&row).await?;
        Ok(outcome)
    }
}

fn check_operation(lease: PluginLease, operation: &str) -> Result<PluginLease, PluginError> {
    if lease.supports(operation) {
        Ok(lease)
    } else {
        Err(PluginError::UnsupportedOperation(operation.to_string()))
    }
}

/// One invocation bounded by `timeout_ms` (absent or zero means unbounded).
async fn invoke_once(
    lease: &PluginLease,
    operation: &str,
    parameters: &Map<String, Value>,
    timeout_ms: Option<u64>,
) -> Result<Value, TaskError> {
    let call = lease.invoke(operation, parameters);
    let result = match timeout_ms.filter(|ms| *ms > 0) {
        Some(ms) => tokio::time::timeout(Duration::from_millis(ms), call)
            .await
            .map_err(|_| TaskError::Timeout(ms))?,
        None => call.await,
    };
    result.map_err(TaskError::Invocation)
}
