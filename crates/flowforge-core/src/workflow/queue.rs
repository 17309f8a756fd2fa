//! Execution request queue and worker pool.
//!
//! Triggers, the API and approval decisions never drive executions inline;
//! they enqueue an [`ExecutionRequest`] and a fixed pool of workers hands
//! each request to an [`ExecutionHandler`] (the orchestrator). The channel is
//! bounded and producers never wait on it: a full queue is reported to the
//! caller as [`QueueError::Full`].
//!
//! The channel lives in memory. Requests lost to a restart are rebuilt from
//! persisted execution state by [`ExecutionLauncher::recover`], so delivery
//! is at-least-once; the orchestrator ignores requests for executions that
//! have already moved on.

use std::future::Future;
use std::sync::Arc;

use flowforge_types::error::RepositoryError;
use chrono::Utc;
use flowforge_types::execution::{ApprovalStatus, ExecutionStatus, TriggerContext, WorkflowExecution};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::repository::WorkflowRepository;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("execution queue is full")]
    Full,

    #[error("execution queue is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Run a `Pending` execution from the start.
    Start,
    /// Continue a `Paused` execution after an approval.
    Resume,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub user_id: String,
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
    pub kind: RequestKind,
}

impl ExecutionRequest {
    pub fn start(execution: &WorkflowExecution) -> Self {
        Self {
            user_id: execution.user_id.clone(),
            workflow_id: execution.workflow_id,
            execution_id: execution.id,
            kind: RequestKind::Start,
        }
    }

    pub fn resume(execution: &WorkflowExecution) -> Self {
        Self {
            kind: RequestKind::Resume,
            ..Self::start(execution)
        }
    }
}

/// Consumer side of the queue.
pub trait ExecutionHandler: Send + Sync + 'static {
    fn handle(&self, request: ExecutionRequest) -> impl Future<Output = ()> + Send;
}

// ---------------------------------------------------------------------------
// ExecutionQueue
// ---------------------------------------------------------------------------

/// Producer handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ExecutionQueue {
    sender: mpsc::Sender<ExecutionRequest>,
}

/// Receiving half returned by [`ExecutionQueue::new`]; consumed by
/// [`QueueReceiver::spawn_workers`].
pub struct QueueReceiver {
    receiver: mpsc::Receiver<ExecutionRequest>,
}

impl ExecutionQueue {
    pub fn new(capacity: usize) -> (Self, QueueReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, QueueReceiver { receiver })
    }

    /// Enqueue, waiting for capacity. Only for callers that may block, such
    /// as startup recovery.
    pub async fn submit(&self, request: ExecutionRequest) -> Result<(), QueueError> {
        tracing::debug!(execution_id = %request.execution_id, kind = ?request.kind, "execution enqueued");
        self.sender
            .send(request)
            .await
            .map_err(|_| QueueError::Closed)
    }

    /// Enqueue without waiting.
    pub fn try_submit(&self, request: ExecutionRequest) -> Result<(), QueueError> {
        self.sender.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }
}

impl QueueReceiver {
    /// Start `workers` tasks pulling from the queue until `cancel` fires or
    /// every producer is dropped.
    pub fn spawn_workers<H: ExecutionHandler>(
        self,
        handler: Arc<H>,
        workers: usize,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let receiver = Arc::new(Mutex::new(self.receiver));
        (0..workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let handler = Arc::clone(&handler);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        let next = {
                            let mut rx = receiver.lock().await;
                            tokio::select! {
                                _ = cancel.cancelled() => None,
                                request = rx.recv() => request,
                            }
                        };
                        let Some(request) = next else { break };
                        tracing::debug!(worker, execution_id = %request.execution_id, "worker picked up execution");
                        handler.handle(request).await;
                    }
                    tracing::debug!(worker, "execution worker stopped");
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ExecutionLauncher
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Creates `Pending` execution rows and enqueues them.
///
/// Shared by the manual API, HTTP triggers and the time trigger processor so
/// every execution starts the same way.
pub struct ExecutionLauncher<R: WorkflowRepository> {
    repo: Arc<R>,
    queue: ExecutionQueue,
}

impl<R: WorkflowRepository> ExecutionLauncher<R> {
    pub fn new(repo: Arc<R>, queue: ExecutionQueue) -> Self {
        Self { repo, queue }
    }

    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    /// Create a `Pending` execution of `workflow_id` for `user_id` and
    /// enqueue it. Returns the new execution id.
    ///
    /// Never waits for queue capacity. If the request cannot be enqueued the
    /// new execution is marked `Failed` with the queue error as its message.
    pub async fn launch(
        &self,
        user_id: &str,
        workflow_id: Uuid,
        trigger: TriggerContext,
    ) -> Result<Uuid, LaunchError> {
        let workflow = self
            .repo
            .get_workflow(&workflow_id)
            .await?
            .filter(|w| w.user_id == user_id)
            .ok_or(LaunchError::WorkflowNotFound(workflow_id))?;

        let execution = WorkflowExecution::pending(workflow.id, user_id, trigger);
        self.repo.create_execution(&execution).await?;
        if let Err(e) = self.queue.try_submit(ExecutionRequest::start(&execution)) {
            self.abandon(execution, &e).await;
            return Err(e.into());
        }

        tracing::info!(
            execution_id = %execution.id,
            workflow = %workflow.name,
            trigger = %execution.trigger.kind,
            "execution launched"
        );
        Ok(execution.id)
    }

    async fn abandon(&self, mut execution: WorkflowExecution, error: &QueueError) {
        tracing::warn!(execution_id = %execution.id, error = %error, "execution not enqueued");
        execution.status = ExecutionStatus::Failed;
        execution.message = Some(format!("not enqueued: {error}"));
        execution.execution_end = Some(Utc::now());
        if let Err(e) = self.repo.update_execution(&execution).await {
            tracing::error!(execution_id = %execution.id, error = %e, "failed to mark unqueued execution");
        }
    }

    /// Re-enqueue every execution a previous process left waiting: `Pending`
    /// ones are started, `Paused` ones whose approval was already decided are
    /// resumed. Waits for queue capacity, so call it once workers are running.
    ///
    /// Returns the number of requests enqueued.
    pub async fn recover(&self) -> Result<usize, LaunchError> {
        let mut requests: Vec<ExecutionRequest> = self
            .repo
            .list_executions_by_status(ExecutionStatus::Pending)
            .await?
            .iter()
            .map(ExecutionRequest::start)
            .collect();

        for execution in self
            .repo
            .list_executions_by_status(ExecutionStatus::Paused)
            .await?
        {
            let decided = match execution.paused_at_task.as_deref() {
                Some(task) => self
                    .repo
                    .find_approval(&execution.id, task)
                    .await?
                    .is_some_and(|a| a.status != ApprovalStatus::Pending),
                None => true,
            };
            if decided {
                requests.push(ExecutionRequest::resume(&execution));
            }
        }

        let count = requests.len();
        for request in requests {
            self.queue.submit(request).await?;
        }
        if count > 0 {
            tracing::info!(count, "re-enqueued interrupted executions");
        }
        Ok(count)
    }
}
