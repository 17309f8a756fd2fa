//! Manual approval gate.
//!
//! A task with `manualApproval.enabled` pauses its execution until a human
//! decides. The gate records approval requests, notifies through an
//! [`ApprovalNotifier`], and applies decisions exactly once: a second
//! decision on the same approval is rejected with `AlreadyDecided`.
//!
//! Resuming or failing the execution after a decision is the orchestrator's
//! job; the gate only owns the approval records.

use std::sync::Arc;

use chrono::Utc;
use flowforge_types::error::RepositoryError;
use flowforge_types::execution::{ApprovalStatus, WorkflowApproval, WorkflowExecution};
use flowforge_types::workflow::WorkflowTask;
use futures_util::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

use crate::repository::WorkflowRepository;

/// Identity recorded as the requester of engine-created approvals.
pub const SYSTEM_REQUESTER: &str = "system";

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval not found: {0}")]
    NotFound(Uuid),

    #[error("approval {id} was already {status}")]
    AlreadyDecided { id: Uuid, status: ApprovalStatus },

    #[error("approver '{approver}' is not allowed to decide task '{task}'")]
    NotAllowed { approver: String, task: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Delivers "approval requested" notices to humans.
///
/// Delivery failures are logged by the gate and never block the pause.
pub trait ApprovalNotifier: Send + Sync {
    fn notify<'a>(&'a self, approval: &'a WorkflowApproval) -> BoxFuture<'a, Result<(), String>>;
}

/// Logs each request at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl ApprovalNotifier for LogNotifier {
    fn notify<'a>(&'a self, approval: &'a WorkflowApproval) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            tracing::info!(
                approval_id = %approval.id,
                execution_id = %approval.execution_id,
                task = %approval.task_name,
                instructions = approval.instructions.as_deref().unwrap_or(""),
                "approval requested"
            );
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// ApprovalGate
// ---------------------------------------------------------------------------

pub struct ApprovalGate<R: WorkflowRepository> {
    repo: Arc<R>,
    notifier: Arc<dyn ApprovalNotifier>,
}

impl<R: WorkflowRepository> Clone for ApprovalGate<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            notifier: Arc::clone(&self.notifier),
        }
    }
}

impl<R: WorkflowRepository> ApprovalGate<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self::with_notifier(repo, Arc::new(LogNotifier))
    }

    pub fn with_notifier(repo: Arc<R>, notifier: Arc<dyn ApprovalNotifier>) -> Self {
        Self { repo, notifier }
    }

    /// Record a pending approval for `task`, or return the one already
    /// pending for this execution and task.
    pub async fn request_approval(
        &self,
        execution: &WorkflowExecution,
        task: &WorkflowTask,
    ) -> Result<WorkflowApproval, ApprovalError> {
        if let Some(existing) = self.find_pending(&execution.id, &task.name).await? {
            return Ok(existing);
        }

        let approval = WorkflowApproval {
            id: Uuid::now_v7(),
            workflow_id: execution.workflow_id,
            execution_id: execution.id,
            task_name: task.name.clone(),
            requested_by: SYSTEM_REQUESTER.to_string(),
            requested_at: Utc::now(),
            status: ApprovalStatus::Pending,
            approver: None,
            decided_at: None,
            instructions: task
                .manual_approval
                .as_ref()
                .and_then(|m| m.instructions.clone()),
        };
        self.repo.create_approval(&approval).await?;

        if let Err(e) = self.notifier.notify(&approval).await {
            tracing::warn!(approval_id = %approval.id, error = %e, "approval notification failed");
        }
        Ok(approval)
    }

    pub async fn approve(&self, id: &Uuid, approver: &str) -> Result<WorkflowApproval, ApprovalError> {
        self.decide(id, ApprovalStatus::Approved, approver).await
    }

    pub async fn reject(&self, id: &Uuid, approver: &str) -> Result<WorkflowApproval, ApprovalError> {
        self.decide(id, ApprovalStatus::Rejected, approver).await
    }

    async fn decide(
        &self,
        id: &Uuid,
        status: ApprovalStatus,
        approver: &str,
    ) -> Result<WorkflowApproval, ApprovalError> {
        let approval = self.get(id).await?;
        if approval.status != ApprovalStatus::Pending {
            return Err(ApprovalError::AlreadyDecided {
                id: *id,
                status: approval.status,
            });
        }
        self.check_approver(&approval, approver).await?;

        if !self.repo.decide_approval(id, status, approver, Utc::now()).await? {
            // Lost a race with a concurrent decision.
            let current = self.get(id).await?;
            return Err(ApprovalError::AlreadyDecided {
                id: *id,
                status: current.status,
            });
        }

        tracing::info!(approval_id = %id, approver, decision = %status, "approval decided");
        self.get(id).await
    }

    /// Enforce the task's `approvers` list when it is non-empty.
    async fn check_approver(
        &self,
        approval: &WorkflowApproval,
        approver: &str,
    ) -> Result<(), ApprovalError> {
        let Some(workflow) = self.repo.get_workflow(&approval.workflow_id).await? else {
            return Ok(());
        };
        let allowed = workflow
            .definition
            .task(&approval.task_name)
            .and_then(|t| t.manual_approval.as_ref())
            .map(|m| m.approvers.clone())
            .unwrap_or_default();
        if allowed.is_empty() || allowed.iter().any(|a| a == approver) {
            Ok(())
        } else {
            Err(ApprovalError::NotAllowed {
                approver: approver.to_string(),
                task: approval.task_name.clone(),
            })
        }
    }

    pub async fn get(&self, id: &Uuid) -> Result<WorkflowApproval, ApprovalError> {
        self.repo
            .get_approval(id)
            .await?
            .ok_or(ApprovalError::NotFound(*id))
    }

    pub async fn list_pending(&self) -> Result<Vec<WorkflowApproval>, ApprovalError> {
        Ok(self.repo.list_pending_approvals().await?)
    }

    /// The pending approval for `(execution_id, task)`, if any.
    pub async fn find_pending(
        &self,
        execution_id: &Uuid,
        task: &str,
    ) -> Result<Option<WorkflowApproval>, ApprovalError> {
        Ok(self
            .repo
            .find_approval(execution_id, task)
            .await?
            .filter(|a| a.status == ApprovalStatus::Pending))
    }

    /// Latest approval for `(execution_id, task)` regardless of status.
    pub async fn latest(
        &self,
        execution_id: &Uuid,
        task: &str,
    ) -> Result<Option<WorkflowApproval>, ApprovalError> {
        Ok(self.repo.find_approval(execution_id, task).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryWorkflowRepository;
    use crate::test_support::{definition, task};
    use flowforge_types::execution::TriggerContext;
    use flowforge_types::workflow::{ManualApproval, StoredWorkflow};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        seen: Mutex<Vec<Uuid>>,
    }

    impl ApprovalNotifier for RecordingNotifier {
        fn notify<'a>(&'a self, approval: &'a WorkflowApproval) -> BoxFuture<'a, Result<(), String>> {
            self.seen.lock().unwrap().push(approval.id);
            Box::pin(async { Err("smtp down".to_string()) })
        }
    }

    fn gated(approvers: &[&str]) -> WorkflowTask {
        let mut t = task("deploy", &[]);
        t.manual_approval = Some(ManualApproval {
            enabled: true,
            approvers: approvers.iter().map(|a| a.to_string()).collect(),
            instructions: Some("check the canary".into()),
        });
        t
    }

    async fn setup(approvers: &[&str]) -> (ApprovalGate<InMemoryWorkflowRepository>, WorkflowExecution, WorkflowTask) {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let t = gated(approvers);
        let stored = StoredWorkflow {
            id: Uuid::now_v7(),
            user_id: "alice".into(),
            name: "release".into(),
            definition: definition(vec![t.clone()]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        repo.save_workflow(&stored).await.unwrap();
        let exec = WorkflowExecution::pending(stored.id, "alice", TriggerContext::manual());
        (ApprovalGate::new(repo), exec, t)
    }

    #[tokio::test]
    async fn request_is_idempotent_while_pending() {
        let (gate, exec, t) = setup(&[]).await;
        let first = gate.request_approval(&exec, &t).await.unwrap();
        let second = gate.request_approval(&exec, &t).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.instructions.as_deref(), Some("check the canary"));
        assert_eq!(gate.list_pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_decision_is_rejected() {
        let (gate, exec, t) = setup(&[]).await;
        let approval = gate.request_approval(&exec, &t).await.unwrap();

        let decided = gate.approve(&approval.id, "ops").await.unwrap();
        assert_eq!(decided.status, ApprovalStatus::Approved);
        assert_eq!(decided.approver.as_deref(), Some("ops"));

        let err = gate.reject(&approval.id, "ops").await.unwrap_err();
        assert!(matches!(
            err,
            ApprovalError::AlreadyDecided { status: ApprovalStatus::Approved, .. }
        ));
        assert!(gate.find_pending(&exec.id, "deploy").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn approvers_list_is_enforced() {
        let (gate, exec, t) = setup(&["carol"]).await;
        let approval = gate.request_approval(&exec, &t).await.unwrap();

        assert!(matches!(
            gate.approve(&approval.id, "mallory").await,
            Err(ApprovalError::NotAllowed { .. })
        ));
        gate.approve(&approval.id, "carol").await.unwrap();
    }

    #[tokio::test]
    async fn unknown_approval_is_not_found() {
        let (gate, _, _) = setup(&[]).await;
        assert!(matches!(
            gate.approve(&Uuid::now_v7(), "ops").await,
            Err(ApprovalError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn notifier_failure_does_not_block_the_request() {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let gate = ApprovalGate::with_notifier(repo, notifier.clone());
        let exec = WorkflowExecution::pending(Uuid::now_v7(), "alice", TriggerContext::manual());

        let approval = gate.request_approval(&exec, &gated(&[])).await.unwrap();
        assert_eq!(notifier.seen.lock().unwrap().as_slice(), &[approval.id]);
    }
}
