//! Workflow repository trait definition.
//!
//! Defines the storage interface for stored workflows, executions, task
//! executions, approvals and triggers. `flowforge-infra` implements it with
//! SQLite; [`InMemoryWorkflowRepository`](super::InMemoryWorkflowRepository)
//! backs tests and embedded use.

use std::future::Future;

use chrono::{DateTime, Utc};
use flowforge_types::error::RepositoryError;
use flowforge_types::execution::{
    ApprovalStatus, ExecutionStatus, WorkflowApproval, WorkflowExecution, WorkflowTaskExecution, WorkflowTrigger,
};
use flowforge_types::workflow::{StoredWorkflow, TriggerType};
use uuid::Uuid;

/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync + 'static {
    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    /// Insert or replace by id. `(user_id, name)` must stay unique; a clash
    /// with a different id is a `Conflict`.
    fn save_workflow(
        &self,
        workflow: &StoredWorkflow,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn get_workflow(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<Option<StoredWorkflow>, RepositoryError>> + Send;

    fn get_workflow_by_name(
        &self,
        user_id: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<StoredWorkflow>, RepositoryError>> + Send;

    fn list_workflows(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<StoredWorkflow>, RepositoryError>> + Send;

    /// Returns `true` if it existed.
    fn delete_workflow(&self, id: &Uuid) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    fn create_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn get_execution(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    /// Replace the stored row. `NotFound` if absent.
    fn update_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Newest first.
    fn list_executions(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    /// Every execution currently in `status`, oldest first.
    fn list_executions_by_status(
        &self,
        status: ExecutionStatus,
    ) -> impl Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Task executions
    // -----------------------------------------------------------------------

    /// Insert or replace by `(execution_id, name)`.
    fn upsert_task_execution(
        &self,
        task: &WorkflowTaskExecution,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn list_task_executions(
        &self,
        execution_id: &Uuid,
    ) -> impl Future<Output = Result<Vec<WorkflowTaskExecution>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Approvals
    // -----------------------------------------------------------------------

    fn create_approval(
        &self,
        approval: &WorkflowApproval,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn get_approval(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<Option<WorkflowApproval>, RepositoryError>> + Send;

    /// Move a `Pending` approval to `status`. Returns `false` without writing
    /// if the approval is no longer pending.
    fn decide_approval(
        &self,
        id: &Uuid,
        status: ApprovalStatus,
        approver: &str,
        decided_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Most recent approval for a task within an execution.
    fn find_approval(
        &self,
        execution_id: &Uuid,
        task_name: &str,
    ) -> impl Future<Output = Result<Option<WorkflowApproval>, RepositoryError>> + Send;

    fn list_pending_approvals(
        &self,
    ) -> impl Future<Output = Result<Vec<WorkflowApproval>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Triggers
    // -----------------------------------------------------------------------

    fn save_trigger(
        &self,
        trigger: &WorkflowTrigger,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn list_triggers(
        &self,
        workflow_id: &Uuid,
    ) -> impl Future<Output = Result<Vec<WorkflowTrigger>, RepositoryError>> + Send;

    fn list_active_triggers(
        &self,
        trigger_type: TriggerType,
    ) -> impl Future<Output = Result<Vec<WorkflowTrigger>, RepositoryError>> + Send;

    /// Returns the number of triggers removed.
    fn delete_triggers(
        &self,
        workflow_id: &Uuid,
    ) -> impl Future<Output = Result<u64, RepositoryError>> + Send;

    fn record_trigger_fired(
        &self,
        id: &Uuid,
        fired_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}
