//! In-memory `WorkflowRepository` backed by concurrent maps.
//!
//! Used by tests and by embedders that do not need durable state. Every
//! operation is a single map access, so no lock is held across an await.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use flowforge_types::error::RepositoryError;
use flowforge_types::execution::{
    ApprovalStatus, ExecutionStatus, TriggerStatus, WorkflowApproval, WorkflowExecution, WorkflowTaskExecution,
    WorkflowTrigger,
};
use flowforge_types::workflow::{StoredWorkflow, TriggerType};
use uuid::Uuid;

use super::workflow::WorkflowRepository;

#[derive(Debug, Default)]
pub struct InMemoryWorkflowRepository {
    workflows: DashMap<Uuid, StoredWorkflow>,
    executions: DashMap<Uuid, WorkflowExecution>,
    tasks: DashMap<(Uuid, String), WorkflowTaskExecution>,
    approvals: DashMap<Uuid, WorkflowApproval>,
    triggers: DashMap<Uuid, WorkflowTrigger>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn save_workflow(&self, workflow: &StoredWorkflow) -> Result<(), RepositoryError> {
        let clash = self.workflows.iter().any(|w| {
            w.id != workflow.id && w.user_id == workflow.user_id && w.name == workflow.name
        });
        if clash {
            return Err(RepositoryError::Conflict(format!(
                "workflow '{}' already exists",
                workflow.name
            )));
        }
        self.workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<StoredWorkflow>, RepositoryError> {
        Ok(self.workflows.get(id).map(|w| w.clone()))
    }

    async fn get_workflow_by_name(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<Option<StoredWorkflow>, RepositoryError> {
        Ok(self
            .workflows
            .iter()
            .find(|w| w.user_id == user_id && w.name == name)
            .map(|w| w.clone()))
    }

    async fn list_workflows(&self, user_id: &str) -> Result<Vec<StoredWorkflow>, RepositoryError> {
        let mut list: Vec<StoredWorkflow> = self
            .workflows
            .iter()
            .filter(|w| w.user_id == user_id)
            .map(|w| w.clone())
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn delete_workflow(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.workflows.remove(id).is_some())
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        if self.executions.contains_key(&execution.id) {
            return Err(RepositoryError::Conflict(format!(
                "execution {} already exists",
                execution.id
            )));
        }
        self.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        Ok(self.executions.get(id).map(|e| e.clone()))
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        match self.executions.get_mut(&execution.id) {
            Some(mut row) => {
                *row = execution.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn list_executions(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let mut list: Vec<WorkflowExecution> = self
            .executions
            .iter()
            .filter(|e| e.workflow_id == *workflow_id)
            .map(|e| e.clone())
            .collect();
        list.sort_by(|a, b| b.id.cmp(&a.id));
        list.truncate(limit as usize);
        Ok(list)
    }

    async fn list_executions_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let mut list: Vec<WorkflowExecution> = self
            .executions
            .iter()
            .filter(|e| e.status == status)
            .map(|e| e.clone())
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    async fn upsert_task_execution(&self, task: &WorkflowTaskExecution) -> Result<(), RepositoryError> {
        self.tasks
            .insert((task.execution_id, task.name.clone()), task.clone());
        Ok(())
    }

    async fn list_task_executions(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<WorkflowTaskExecution>, RepositoryError> {
        let mut list: Vec<WorkflowTaskExecution> = self
            .tasks
            .iter()
            .filter(|t| t.execution_id == *execution_id)
            .map(|t| t.clone())
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    async fn create_approval(&self, approval: &WorkflowApproval) -> Result<(), RepositoryError> {
        self.approvals.insert(approval.id, approval.clone());
        Ok(())
    }

    async fn get_approval(&self, id: &Uuid) -> Result<Option<WorkflowApproval>, RepositoryError> {
        Ok(self.approvals.get(id).map(|a| a.clone()))
    }

    async fn decide_approval(
        &self,
        id: &Uuid,
        status: ApprovalStatus,
        approver: &str,
        decided_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut approval = self.approvals.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if approval.status != ApprovalStatus::Pending {
            return Ok(false);
        }
        approval.status = status;
        approval.approver = Some(approver.to_string());
        approval.decided_at = Some(decided_at);
        Ok(true)
    }

    async fn find_approval(
        &self,
        execution_id: &Uuid,
        task_name: &str,
    ) -> Result<Option<WorkflowApproval>, RepositoryError> {
        Ok(self
            .approvals
            .iter()
            .filter(|a| a.execution_id == *execution_id && a.task_name == task_name)
            .max_by_key(|a| (a.requested_at, a.id))
            .map(|a| a.clone()))
    }

    async fn list_pending_approvals(&self) -> Result<Vec<WorkflowApproval>, RepositoryError> {
        let mut list: Vec<WorkflowApproval> = self
            .approvals
            .iter()
            .filter(|a| a.status == ApprovalStatus::Pending)
            .map(|a| a.clone())
            .collect();
        list.sort_by_key(|a| a.requested_at);
        Ok(list)
    }

    async fn save_trigger(&self, trigger: &WorkflowTrigger) -> Result<(), RepositoryError> {
        self.triggers.insert(trigger.id, trigger.clone());
        Ok(())
    }

    async fn list_triggers(&self, workflow_id: &Uuid) -> Result<Vec<WorkflowTrigger>, RepositoryError> {
        Ok(self
            .triggers
            .iter()
            .filter(|t| t.workflow_id == *workflow_id)
            .map(|t| t.clone())
            .collect())
    }

    async fn list_active_triggers(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<WorkflowTrigger>, RepositoryError> {
        let mut list: Vec<WorkflowTrigger> = self
            .triggers
            .iter()
            .filter(|t| t.trigger_type == trigger_type && t.status == TriggerStatus::Active)
            .map(|t| t.clone())
            .collect();
        list.sort_by_key(|t| t.created_at);
        Ok(list)
    }

    async fn delete_triggers(&self, workflow_id: &Uuid) -> Result<u64, RepositoryError> {
        let before = self.triggers.len();
        self.triggers.retain(|_, t| t.workflow_id != *workflow_id);
        Ok((before - self.triggers.len()) as u64)
    }

    async fn record_trigger_fired(&self, id: &Uuid, fired_at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut trigger = self.triggers.get_mut(id).ok_or(RepositoryError::NotFound)?;
        trigger.last_fired_at = Some(fired_at);
        Ok(())
    }
}
