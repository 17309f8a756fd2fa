//! Execution tracking types: executions, task executions, approvals and
//! persisted trigger records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::TriggerType;

/// Generates `as_str` / `Display` / `FromStr` for a status enum stored as
/// lowercase text.
macro_rules! status_strings {
    ($ty:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok($ty::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($ty), other)),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Lifecycle of a workflow execution.
///
/// `Pending -> Running -> {Paused <-> Running} -> {Completed | Failed | Canceled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Canceled,
}

status_strings!(ExecutionStatus {
    Pending => "pending",
    Running => "running",
    Paused => "paused",
    Completed => "completed",
    Failed => "failed",
    Canceled => "canceled",
});

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Canceled
        )
    }
}

/// Status of a single task within an execution. A task whose condition
/// evaluated false is recorded as `Canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Retrying,
    Completed,
    Canceled,
    Failed,
}

status_strings!(TaskStatus {
    Pending => "pending",
    Running => "running",
    Retrying => "retrying",
    Completed => "completed",
    Canceled => "canceled",
    Failed => "failed",
});

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Canceled | TaskStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

status_strings!(ApprovalStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    Active,
    Inactive,
}

status_strings!(TriggerStatus {
    Active => "active",
    Inactive => "inactive",
});

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// What started an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerContext {
    pub kind: TriggerType,
    /// Payload handed to conditions as `trigger` (HTTP body, schedule info).
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl TriggerContext {
    pub fn manual() -> Self {
        Self {
            kind: TriggerType::Manual,
            payload: serde_json::Value::Null,
        }
    }
}

/// One run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub user_id: String,
    pub status: ExecutionStatus,
    pub trigger: TriggerContext,
    pub execution_start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at_task: Option<String>,
    /// Failure or cancellation cause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WorkflowExecution {
    /// A fresh `Pending` execution.
    pub fn pending(workflow_id: Uuid, user_id: impl Into<String>, trigger: TriggerContext) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            user_id: user_id.into(),
            status: ExecutionStatus::Pending,
            trigger,
            execution_start: Utc::now(),
            execution_end: None,
            paused_at_task: None,
            message: None,
        }
    }
}

/// Status record of one task inside one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTaskExecution {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub name: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl WorkflowTaskExecution {
    pub fn new(execution_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            execution_id,
            name: name.into(),
            status: TaskStatus::Pending,
            attempts: 0,
            message: None,
            start_time: None,
            end_time: None,
        }
    }
}

/// A manual approval request for a gated task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowApproval {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
    pub task_name: String,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// A trigger registered for a stored workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTrigger {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub user_id: String,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    pub status: TriggerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowTrigger {
    pub fn property(&self, key: &str) -> Option<String> {
        crate::workflow::property_string(&self.properties, key)
    }
}
