//! Execution orchestrator: ready-set DAG dispatch with pause, resume and cancel.
//!
//! The `ExecutionOrchestrator` drives one execution at a time per execution
//! id (a per-execution async mutex serialises concurrent calls) and any
//! number of executions concurrently.
//!
//! # Execution flow
//!
//! 1. Load the execution; `run` only acts on `Pending`, `resume` only on
//!    `Paused`. Anything else is a logged no-op, which makes duplicate queue
//!    deliveries harmless.
//! 2. Load and validate the stored definition.
//! 3. Repeatedly dispatch every task whose dependencies are all terminal, in
//!    declaration order, up to `max_parallel` in flight. A task with a
//!    failed dependency is failed by propagation unless its `when` tolerates
//!    the failure.
//! 4. Reaching an approval-gated task stops dispatching; once in-flight tasks
//!    drain, the execution is persisted `Paused` and control returns.
//! 5. When nothing is left to run, the outcome is computed, results are
//!    saved and the execution row is finalised.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use flowforge_types::config::OrchestratorSettings;
use flowforge_types::error::RepositoryError;
use flowforge_types::event::EngineEvent;
use flowforge_types::execution::{
    ApprovalStatus, ExecutionStatus, TaskStatus, WorkflowApproval, WorkflowExecution,
    WorkflowTaskExecution,
};
use flowforge_types::workflow::WorkflowDefinition;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::plugin::PluginHost;
use crate::repository::WorkflowRepository;
use crate::storage::ResultStorage;

use super::approval::{ApprovalError, ApprovalGate};
use super::condition;
use super::context::ExecutionContext;
use super::executor::{TaskExecutor, TaskOutcome, TaskRequest};
use super::graph::DependencyGraph;
use super::queue::{ExecutionHandler, ExecutionRequest, RequestKind};
use super::validator::validate;

/// Message prefix of tasks failed because a dependency failed.
pub const UPSTREAM_FAILED: &str = "upstream failed";

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("task runner crashed: {0}")]
    TaskCrashed(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),
}

// ---------------------------------------------------------------------------
// ExecutionOrchestrator
// ---------------------------------------------------------------------------

pub struct ExecutionOrchestrator<R: WorkflowRepository, S: ResultStorage> {
    repo: Arc<R>,
    storage: Arc<S>,
    executor: Arc<TaskExecutor<R>>,
    approvals: ApprovalGate<R>,
    events: EventBus,
    max_parallel: usize,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    /// Cancellation tokens keyed by execution id, present while a run or
    /// resume is in progress (or queued behind the lock).
    cancellations: DashMap<Uuid, CancellationToken>,
}

impl<R: WorkflowRepository, S: ResultStorage> ExecutionOrchestrator<R, S> {
    pub fn new(
        repo: Arc<R>,
        storage: Arc<S>,
        plugins: Arc<PluginHost>,
        settings: &OrchestratorSettings,
    ) -> Self {
        Self {
            executor: Arc::new(TaskExecutor::new(Arc::clone(&repo), plugins)),
            approvals: ApprovalGate::new(Arc::clone(&repo)),
            repo,
            storage,
            events: EventBus::default(),
            max_parallel: settings.max_parallel.max(1),
            locks: DashMap::new(),
            cancellations: DashMap::new(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_approval_gate(mut self, approvals: ApprovalGate<R>) -> Self {
        self.approvals = approvals;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn approvals(&self) -> &ApprovalGate<R> {
        &self.approvals
    }

    pub fn executor(&self) -> &Arc<TaskExecutor<R>> {
        &self.executor
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Run a `Pending` execution until it pauses or finishes.
    pub async fn run(&self, execution_id: Uuid) -> Result<ExecutionStatus, OrchestratorError> {
        let token = self.token_for(execution_id);
        let lock = self.lock_for(execution_id);
        let result = {
            let _guard = lock.lock().await;
            self.start(execution_id, token).await
        };
        self.release(execution_id, lock);
        result
    }

    /// Continue a `Paused` execution whose gating approval was approved.
    pub async fn resume(&self, execution_id: Uuid) -> Result<ExecutionStatus, OrchestratorError> {
        let token = self.token_for(execution_id);
        let lock = self.lock_for(execution_id);
        let result = {
            let _guard = lock.lock().await;
            self.continue_paused(execution_id, token).await
        };
        self.release(execution_id, lock);
        result
    }

    /// Approve and resume inline.
    pub async fn approve(
        &self,
        approval_id: Uuid,
        approver: &str,
    ) -> Result<ExecutionStatus, OrchestratorError> {
        let approval = self.approvals.approve(&approval_id, approver).await?;
        self.resume(approval.execution_id).await
    }

    /// Reject: the gated task and the execution end `Failed`.
    pub async fn reject(
        &self,
        approval_id: Uuid,
        approver: &str,
    ) -> Result<ExecutionStatus, OrchestratorError> {
        let approval = self.approvals.reject(&approval_id, approver).await?;
        let lock = self.lock_for(approval.execution_id);
        let result = {
            let _guard = lock.lock().await;
            self.settle_rejection(&approval).await
        };
        self.release(approval.execution_id, lock);
        result
    }

    /// Request cancellation. Returns `false` when the execution is already
    /// terminal.
    ///
    /// A running execution stops dispatching and lets in-flight tasks finish;
    /// a `Pending` or `Paused` one is canceled immediately.
    pub async fn cancel(&self, execution_id: Uuid) -> Result<bool, OrchestratorError> {
        if let Some(token) = self.cancellations.get(&execution_id) {
            token.cancel();
            tracing::info!(%execution_id, "cancellation requested");
            return Ok(true);
        }

        let lock = self.lock_for(execution_id);
        let result = {
            let _guard = lock.lock().await;
            self.cancel_idle(execution_id).await
        };
        self.release(execution_id, lock);
        result
    }

    // -----------------------------------------------------------------------
    // Locking
    // -----------------------------------------------------------------------

    fn token_for(&self, execution_id: Uuid) -> CancellationToken {
        self.cancellations.entry(execution_id).or_default().clone()
    }

    fn lock_for(&self, execution_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(execution_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release(&self, execution_id: Uuid, lock: Arc<Mutex<()>>) {
        // Map + our clone: nobody else is waiting.
        let idle = self
            .locks
            .remove_if(&execution_id, |_, l| Arc::strong_count(l) <= 2)
            .is_some();
        drop(lock);
        if idle {
            self.cancellations.remove(&execution_id);
        }
    }

    // -----------------------------------------------------------------------
    // State transitions
    // -----------------------------------------------------------------------

    async fn start(
        &self,
        execution_id: Uuid,
        token: CancellationToken,
    ) -> Result<ExecutionStatus, OrchestratorError> {
        let mut execution = self.load(execution_id).await?;
        if execution.status != ExecutionStatus::Pending {
            tracing::debug!(%execution_id, status = %execution.status, "execution not pending, ignoring run");
            return Ok(execution.status);
        }

        let ctx = ExecutionContext::new(&execution);
        let Some(definition) = self.load_definition(&mut execution, &ctx).await? else {
            return Ok(execution.status);
        };
        if token.is_cancelled() {
            return self.cancel_unstarted(execution, &definition, ctx).await;
        }

        execution.status = ExecutionStatus::Running;
        self.repo.update_execution(&execution).await?;
        self.events.publish(EngineEvent::ExecutionStarted {
            execution_id,
            workflow_id: execution.workflow_id,
            resumed: false,
        });
        tracing::info!(%execution_id, workflow = %definition.name, "execution started");

        self.drive(execution, &definition, ctx, HashSet::new(), token)
            .await
    }

    async fn continue_paused(
        &self,
        execution_id: Uuid,
        token: CancellationToken,
    ) -> Result<ExecutionStatus, OrchestratorError> {
        let mut execution = self.load(execution_id).await?;
        if execution.status != ExecutionStatus::Paused {
            tracing::debug!(%execution_id, status = %execution.status, "execution not paused, ignoring resume");
            return Ok(execution.status);
        }

        if let Some(task) = execution.paused_at_task.clone() {
            match self.approvals.latest(&execution_id, &task).await? {
                Some(a) if a.status == ApprovalStatus::Approved => {}
                Some(a) if a.status == ApprovalStatus::Rejected => {
                    return self.settle_rejection(&a).await;
                }
                _ => {
                    tracing::debug!(%execution_id, task = %task, "approval still pending, staying paused");
                    return Ok(ExecutionStatus::Paused);
                }
            }
        }

        let rows = self.repo.list_task_executions(&execution_id).await?;
        let ctx = ExecutionContext::new(&execution);
        let results = match self.storage.load_result(&ctx.scope).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(%execution_id, error = %e, "failed to load saved results, resuming without outputs");
                None
            }
        };
        let ctx = ExecutionContext::restore(&execution, &rows, results);
        let propagated = rows
            .iter()
            .filter(|r| {
                r.status == TaskStatus::Failed
                    && r.message.as_deref().is_some_and(|m| m.starts_with(UPSTREAM_FAILED))
            })
            .map(|r| r.name.clone())
            .collect();

        let Some(definition) = self.load_definition(&mut execution, &ctx).await? else {
            return Ok(execution.status);
        };
        if token.is_cancelled() {
            return self.cancel_unstarted(execution, &definition, ctx).await;
        }

        execution.status = ExecutionStatus::Running;
        execution.paused_at_task = None;
        self.repo.update_execution(&execution).await?;
        self.events.publish(EngineEvent::ExecutionStarted {
            execution_id,
            workflow_id: execution.workflow_id,
            resumed: true,
        });
        tracing::info!(%execution_id, workflow = %definition.name, "execution resumed");

        self.drive(execution, &definition, ctx, propagated, token)
            .await
    }

    /// The ready-set loop. Returns once nothing is in flight and nothing
    /// more may be dispatched.
    async fn drive(
        &self,
        mut execution: WorkflowExecution,
        definition: &WorkflowDefinition,
        mut ctx: ExecutionContext,
        mut propagated: HashSet<String>,
        token: CancellationToken,
    ) -> Result<ExecutionStatus, OrchestratorError> {
        let graph = DependencyGraph::from_definition(definition);
        let mut join_set: JoinSet<(String, Result<TaskOutcome, RepositoryError>)> = JoinSet::new();
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut gate: Option<String> = None;
        let mut fatal: Option<OrchestratorError> = None;

        loop {
            while gate.is_none() && fatal.is_none() && !token.is_cancelled() {
                let mut progressed = false;

                for name in graph.task_names() {
                    if in_flight.len() >= self.max_parallel {
                        break;
                    }
                    if in_flight.contains(name) || is_started(ctx.status(name)) {
                        continue;
                    }
                    let deps = graph.dependencies_of(name);
                    if !deps
                        .iter()
                        .all(|d| ctx.status(d).is_some_and(|s| s.is_terminal()))
                    {
                        continue;
                    }
                    let Some(task) = definition.task(name) else {
                        continue;
                    };

                    let snapshot = ctx.to_expression_context();
                    let failed: Vec<&str> = deps
                        .iter()
                        .filter(|d| ctx.status(d) == Some(TaskStatus::Failed))
                        .map(String::as_str)
                        .collect();
                    let mut condition_checked = false;
                    if !failed.is_empty() {
                        let tolerates = match task.when.as_deref() {
                            Some(expr) => condition::evaluate(expr, &snapshot).unwrap_or_else(|e| {
                                tracing::warn!(task = %name, error = %e, "condition failed, treating upstream failure as fatal");
                                false
                            }),
                            None => false,
                        };
                        if !tolerates {
                            let message = format!("{UPSTREAM_FAILED}: {}", failed.join(", "));
                            self.record_terminal(&execution, name, TaskStatus::Failed, &message)
                                .await?;
                            ctx.set_status(name, TaskStatus::Failed);
                            propagated.insert(name.to_string());
                            progressed = true;
                            continue;
                        }
                        condition_checked = true;
                    }

                    if task.requires_approval() {
                        let decision = self
                            .approvals
                            .latest(&execution.id, name)
                            .await?
                            .map(|a| (a.status, a.approver));
                        match decision {
                            Some((ApprovalStatus::Approved, _)) => {}
                            Some((ApprovalStatus::Rejected, approver)) => {
                                let message =
                                    format!("rejected by {}", approver.as_deref().unwrap_or("unknown"));
                                self.record_terminal(&execution, name, TaskStatus::Failed, &message)
                                    .await?;
                                ctx.set_status(name, TaskStatus::Failed);
                                progressed = true;
                                continue;
                            }
                            _ => {
                                tracing::info!(execution_id = %execution.id, task = %name, "approval gate reached");
                                gate = Some(name.to_string());
                                break;
                            }
                        }
                    }

                    ctx.set_status(name, TaskStatus::Running);
                    in_flight.insert(name.to_string());
                    self.events.publish(EngineEvent::TaskDispatched {
                        execution_id: execution.id,
                        task: name.to_string(),
                    });
                    tracing::debug!(execution_id = %execution.id, task = %name, "task dispatched");

                    let executor = Arc::clone(&self.executor);
                    let request = TaskRequest {
                        scope: ctx.scope.clone(),
                        task: task.clone(),
                        condition_context: snapshot,
                        condition_checked,
                    };
                    let task_name = name.to_string();
                    join_set.spawn(async move {
                        let outcome = executor.execute(request).await;
                        (task_name, outcome)
                    });
                    progressed = true;
                }

                if !progressed || in_flight.len() >= self.max_parallel {
                    break;
                }
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            match joined {
                Ok((name, Ok(outcome))) => {
                    in_flight.remove(&name);
                    ctx.set_status(&name, outcome.status);
                    if let Some(output) = outcome.output {
                        ctx.set_output(&name, output);
                    }
                    if let Some(error) = &outcome.error {
                        tracing::warn!(execution_id = %execution.id, task = %name, error = %error, "task failed");
                    }
                    self.events.publish(EngineEvent::TaskFinished {
                        execution_id: execution.id,
                        task: name,
                        status: outcome.status,
                    });
                }
                Ok((name, Err(e))) => {
                    in_flight.remove(&name);
                    ctx.set_status(&name, TaskStatus::Failed);
                    tracing::error!(execution_id = %execution.id, task = %name, error = %e, "task state could not be persisted");
                    fatal.get_or_insert(OrchestratorError::Repository(e));
                }
                Err(e) => {
                    tracing::error!(execution_id = %execution.id, error = %e, "task runner crashed");
                    fatal.get_or_insert(OrchestratorError::TaskCrashed(e.to_string()));
                }
            }
        }

        if let Some(error) = fatal {
            execution.status = ExecutionStatus::Failed;
            execution.message = Some(error.to_string());
            execution.execution_end = Some(Utc::now());
            if let Err(e) = self.repo.update_execution(&execution).await {
                tracing::error!(execution_id = %execution.id, error = %e, "failed to record execution failure");
            }
            self.events.publish(EngineEvent::ExecutionFinished {
                execution_id: execution.id,
                status: ExecutionStatus::Failed,
            });
            return Err(error);
        }

        if token.is_cancelled() {
            return self.cancel_unstarted(execution, definition, ctx).await;
        }

        if let Some(name) = gate {
            return self.pause(execution, definition, ctx, &name).await;
        }

        let failed = untolerated_failures(&graph, definition, &ctx, &propagated);
        let (status, message) = if failed.is_empty() {
            (ExecutionStatus::Completed, None)
        } else {
            (
                ExecutionStatus::Failed,
                Some(format!("task(s) failed: {}", failed.join(", "))),
            )
        };
        self.finish(execution, &ctx, status, message).await
    }

    async fn pause(
        &self,
        mut execution: WorkflowExecution,
        definition: &WorkflowDefinition,
        ctx: ExecutionContext,
        task_name: &str,
    ) -> Result<ExecutionStatus, OrchestratorError> {
        let Some(task) = definition.task(task_name) else {
            return self
                .finish(
                    execution,
                    &ctx,
                    ExecutionStatus::Failed,
                    Some(format!("gated task '{task_name}' not found")),
                )
                .await;
        };
        let approval = self.approvals.request_approval(&execution, task).await?;

        let mut row = WorkflowTaskExecution::new(execution.id, task_name);
        row.message = Some(format!("awaiting approval {}", approval.id));
        self.repo.upsert_task_execution(&row).await?;

        if let Err(e) = self.storage.save_result(&ctx.scope, &ctx.results()).await {
            tracing::error!(execution_id = %execution.id, error = %e, "failed to save partial results");
            return self
                .finish(execution, &ctx, ExecutionStatus::Failed, Some(e.to_string()))
                .await;
        }

        execution.status = ExecutionStatus::Paused;
        execution.paused_at_task = Some(task_name.to_string());
        self.repo.update_execution(&execution).await?;
        self.events.publish(EngineEvent::ExecutionPaused {
            execution_id: execution.id,
            task: task_name.to_string(),
            approval_id: approval.id,
        });
        tracing::info!(execution_id = %execution.id, task = %task_name, approval_id = %approval.id, "execution paused for approval");
        Ok(ExecutionStatus::Paused)
    }

    /// Apply a rejection to a paused execution gated on `approval`.
    async fn settle_rejection(
        &self,
        approval: &WorkflowApproval,
    ) -> Result<ExecutionStatus, OrchestratorError> {
        let mut execution = self.load(approval.execution_id).await?;
        if execution.status != ExecutionStatus::Paused
            || execution.paused_at_task.as_deref() != Some(approval.task_name.as_str())
        {
            return Ok(execution.status);
        }

        let message = format!(
            "rejected by {}",
            approval.approver.as_deref().unwrap_or("unknown")
        );
        self.record_terminal(&execution, &approval.task_name, TaskStatus::Failed, &message)
            .await?;

        let rows = self.repo.list_task_executions(&execution.id).await?;
        let ctx = ExecutionContext::restore(&execution, &rows, None);
        if let Some(workflow) = self.repo.get_workflow(&execution.workflow_id).await? {
            for task in &workflow.definition.tasks {
                if !is_started(ctx.status(&task.name)) && task.name != approval.task_name {
                    self.record_terminal(
                        &execution,
                        &task.name,
                        TaskStatus::Canceled,
                        "canceled: approval rejected",
                    )
                    .await?;
                }
            }
        }

        execution.status = ExecutionStatus::Failed;
        execution.paused_at_task = None;
        execution.message = Some(message);
        execution.execution_end = Some(Utc::now());
        self.repo.update_execution(&execution).await?;
        self.events.publish(EngineEvent::ExecutionFinished {
            execution_id: execution.id,
            status: ExecutionStatus::Failed,
        });
        tracing::info!(execution_id = %execution.id, task = %approval.task_name, "execution failed on approval rejection");
        Ok(ExecutionStatus::Failed)
    }

    async fn cancel_idle(&self, execution_id: Uuid) -> Result<bool, OrchestratorError> {
        let execution = self.load(execution_id).await?;
        match execution.status {
            ExecutionStatus::Pending | ExecutionStatus::Paused => {
                let rows = self.repo.list_task_executions(&execution_id).await?;
                let ctx = ExecutionContext::restore(&execution, &rows, None);
                match self.repo.get_workflow(&execution.workflow_id).await? {
                    Some(workflow) => {
                        self.cancel_unstarted(execution, &workflow.definition, ctx)
                            .await?;
                    }
                    None => {
                        let definition = WorkflowDefinition {
                            name: String::new(),
                            description: None,
                            configuration: Default::default(),
                            tasks: Vec::new(),
                        };
                        self.cancel_unstarted(execution, &definition, ctx).await?;
                    }
                }
                Ok(true)
            }
            // Running without a token here means another process owns it.
            _ => Ok(false),
        }
    }

    async fn cancel_unstarted(
        &self,
        mut execution: WorkflowExecution,
        definition: &WorkflowDefinition,
        ctx: ExecutionContext,
    ) -> Result<ExecutionStatus, OrchestratorError> {
        for task in &definition.tasks {
            if !is_started(ctx.status(&task.name)) {
                self.record_terminal(&execution, &task.name, TaskStatus::Canceled, "canceled")
                    .await?;
            }
        }
        execution.paused_at_task = None;
        tracing::info!(execution_id = %execution.id, "execution canceled");
        let message = Some("canceled by request".to_string());
        execution.status = ExecutionStatus::Canceled;
        self.finish(execution, &ctx, ExecutionStatus::Canceled, message)
            .await
    }

    /// Save results and write the terminal execution row.
    async fn finish(
        &self,
        mut execution: WorkflowExecution,
        ctx: &ExecutionContext,
        mut status: ExecutionStatus,
        mut message: Option<String>,
    ) -> Result<ExecutionStatus, OrchestratorError> {
        match self.storage.save_result(&ctx.scope, &ctx.results()).await {
            Ok(locator) => {
                tracing::debug!(execution_id = %execution.id, locator = %locator, "results saved");
            }
            Err(e) => {
                tracing::error!(execution_id = %execution.id, error = %e, "failed to save results");
                status = ExecutionStatus::Failed;
                message = Some(e.to_string());
            }
        }

        execution.status = status;
        execution.message = message;
        execution.execution_end = Some(Utc::now());
        self.repo.update_execution(&execution).await?;
        self.events.publish(EngineEvent::ExecutionFinished {
            execution_id: execution.id,
            status,
        });
        tracing::info!(execution_id = %execution.id, status = %status, "execution finished");
        Ok(status)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn load(&self, execution_id: Uuid) -> Result<WorkflowExecution, OrchestratorError> {
        self.repo
            .get_execution(&execution_id)
            .await?
            .ok_or(OrchestratorError::ExecutionNotFound(execution_id))
    }

    /// Load and validate the definition. On failure the execution is
    /// finalised as `Failed` and `None` is returned.
    async fn load_definition(
        &self,
        execution: &mut WorkflowExecution,
        ctx: &ExecutionContext,
    ) -> Result<Option<WorkflowDefinition>, OrchestratorError> {
        let problem = match self.repo.get_workflow(&execution.workflow_id).await? {
            None => format!("workflow {} not found", execution.workflow_id),
            Some(workflow) => {
                let report = validate(&workflow.definition);
                if report.is_valid() {
                    return Ok(Some(workflow.definition));
                }
                format!("invalid workflow: {}", report.summary())
            }
        };

        tracing::error!(execution_id = %execution.id, reason = %problem, "execution cannot start");
        let status = self
            .finish(execution.clone(), ctx, ExecutionStatus::Failed, Some(problem.clone()))
            .await?;
        execution.status = status;
        execution.message = Some(problem);
        Ok(None)
    }

    async fn record_terminal(
        &self,
        execution: &WorkflowExecution,
        task: &str,
        status: TaskStatus,
        message: &str,
    ) -> Result<(), RepositoryError> {
        let mut row = WorkflowTaskExecution::new(execution.id, task);
        row.status = status;
        row.message = Some(message.to_string());
        row.end_time = Some(Utc::now());
        self.repo.upsert_task_execution(&row).await?;
        self.events.publish(EngineEvent::TaskFinished {
            execution_id: execution.id,
            task: task.to_string(),
            status,
        });
        Ok(())
    }
}

impl<R: WorkflowRepository, S: ResultStorage> ExecutionHandler for ExecutionOrchestrator<R, S> {
    async fn handle(&self, request: ExecutionRequest) {
        let result = match request.kind {
            RequestKind::Start => self.run(request.execution_id).await,
            RequestKind::Resume => self.resume(request.execution_id).await,
        };
        match result {
            Ok(status) => {
                tracing::debug!(execution_id = %request.execution_id, status = %status, "execution request handled");
            }
            Err(e) => {
                tracing::error!(execution_id = %request.execution_id, error = %e, "execution request failed");
            }
        }
    }
}

/// A task counts as started once it has a non-`Pending` status.
fn is_started(status: Option<TaskStatus>) -> bool {
    status.is_some_and(|s| s != TaskStatus::Pending)
}

/// Failed tasks that no dependent tolerated, in declaration order.
///
/// A failure is tolerated when a dependent with a `when` condition went on to
/// run instead of being failed by propagation.
fn untolerated_failures(
    graph: &DependencyGraph,
    definition: &WorkflowDefinition,
    ctx: &ExecutionContext,
    propagated: &HashSet<String>,
) -> Vec<String> {
    graph
        .task_names()
        .iter()
        .filter(|name| ctx.status(name) == Some(TaskStatus::Failed))
        .filter(|name| {
            !graph.dependents_of(name).iter().any(|dependent| {
                definition.task(dependent).is_some_and(|t| t.when.is_some())
                    && ctx.status(dependent).is_some_and(|s| s.is_terminal())
                    && !propagated.contains(dependent.as_str())
            })
        })
        .cloned()
        .collect()
}
