//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `flowforge-core` using sqlx with split
//! read/write pools. Definitions, trigger payloads and trigger properties are
//! stored as JSON text; statuses as their lowercase names.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use flowforge_core::repository::WorkflowRepository;
use flowforge_types::error::RepositoryError;
use flowforge_types::execution::{
    ApprovalStatus, ExecutionStatus, TaskStatus, TriggerContext, TriggerStatus, WorkflowApproval,
    WorkflowExecution, WorkflowTaskExecution, WorkflowTrigger,
};
use flowforge_types::workflow::{StoredWorkflow, TriggerType};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowRepository`.
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn workflow_from_row(row: &SqliteRow) -> Result<StoredWorkflow, RepositoryError> {
    let definition: String = get(row, "definition")?;
    Ok(StoredWorkflow {
        id: parse_uuid(&get::<String>(row, "id")?)?,
        user_id: get(row, "user_id")?,
        name: get(row, "name")?,
        definition: parse_json(&definition, "workflow definition")?,
        created_at: parse_datetime(&get::<String>(row, "created_at")?)?,
        updated_at: parse_datetime(&get::<String>(row, "updated_at")?)?,
    })
}

fn execution_from_row(row: &SqliteRow) -> Result<WorkflowExecution, RepositoryError> {
    let payload: String = get(row, "trigger_payload")?;
    Ok(WorkflowExecution {
        id: parse_uuid(&get::<String>(row, "id")?)?,
        workflow_id: parse_uuid(&get::<String>(row, "workflow_id")?)?,
        user_id: get(row, "user_id")?,
        status: parse_enum::<ExecutionStatus>(&get::<String>(row, "status")?)?,
        trigger: TriggerContext {
            kind: parse_enum::<TriggerType>(&get::<String>(row, "trigger_type")?)?,
            payload: parse_json(&payload, "trigger payload")?,
        },
        execution_start: parse_datetime(&get::<String>(row, "execution_start")?)?,
        execution_end: parse_optional_datetime(get(row, "execution_end")?)?,
        paused_at_task: get(row, "paused_at_task")?,
        message: get(row, "message")?,
    })
}

fn task_from_row(row: &SqliteRow) -> Result<WorkflowTaskExecution, RepositoryError> {
    let attempts: i64 = get(row, "attempts")?;
    Ok(WorkflowTaskExecution {
        id: parse_uuid(&get::<String>(row, "id")?)?,
        execution_id: parse_uuid(&get::<String>(row, "execution_id")?)?,
        name: get(row, "name")?,
        status: parse_enum::<TaskStatus>(&get::<String>(row, "status")?)?,
        attempts: attempts.max(0) as u32,
        message: get(row, "message")?,
        start_time: parse_optional_datetime(get(row, "start_time")?)?,
        end_time: parse_optional_datetime(get(row, "end_time")?)?,
    })
}

fn approval_from_row(row: &SqliteRow) -> Result<WorkflowApproval, RepositoryError> {
    Ok(WorkflowApproval {
        id: parse_uuid(&get::<String>(row, "id")?)?,
        workflow_id: parse_uuid(&get::<String>(row, "workflow_id")?)?,
        execution_id: parse_uuid(&get::<String>(row, "execution_id")?)?,
        task_name: get(row, "task_name")?,
        requested_by: get(row, "requested_by")?,
        requested_at: parse_datetime(&get::<String>(row, "requested_at")?)?,
        status: parse_enum::<ApprovalStatus>(&get::<String>(row, "status")?)?,
        approver: get(row, "approver")?,
        decided_at: parse_optional_datetime(get(row, "decided_at")?)?,
        instructions: get(row, "instructions")?,
    })
}

fn trigger_from_row(row: &SqliteRow) -> Result<WorkflowTrigger, RepositoryError> {
    let properties: String = get(row, "properties")?;
    Ok(WorkflowTrigger {
        id: parse_uuid(&get::<String>(row, "id")?)?,
        workflow_id: parse_uuid(&get::<String>(row, "workflow_id")?)?,
        user_id: get(row, "user_id")?,
        trigger_type: parse_enum::<TriggerType>(&get::<String>(row, "trigger_type")?)?,
        properties: parse_json::<HashMap<String, serde_json::Value>>(&properties, "trigger properties")?,
        status: parse_enum::<TriggerStatus>(&get::<String>(row, "status")?)?,
        last_fired_at: parse_optional_datetime(get(row, "last_fired_at")?)?,
        created_at: parse_datetime(&get::<String>(row, "created_at")?)?,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column)
        .map_err(|e| RepositoryError::Query(format!("column {column}: {e}")))
}

fn query_error(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => RepositoryError::Connection,
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(db.message().to_string())
        }
        _ => RepositoryError::Query(e.to_string()),
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_enum<T: FromStr<Err = String>>(s: &str) -> Result<T, RepositoryError> {
    s.parse::<T>().map_err(RepositoryError::Query)
}

fn parse_json<T: serde::de::DeserializeOwned>(s: &str, what: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {what} JSON: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(format!("serialize: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    s.as_deref().map(parse_datetime).transpose()
}

/// Fixed-width so timestamps sort lexicographically.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save_workflow(&self, workflow: &StoredWorkflow) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflows (id, user_id, name, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 definition = excluded.definition,
                 updated_at = excluded.updated_at"#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.user_id)
        .bind(&workflow.name)
        .bind(to_json(&workflow.definition)?)
        .bind(format_datetime(&workflow.created_at))
        .bind(format_datetime(&workflow.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match query_error(e) {
            RepositoryError::Conflict(_) => {
                RepositoryError::Conflict(format!("workflow '{}' already exists", workflow.name))
            }
            other => other,
        })?;
        Ok(())
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<StoredWorkflow>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;
        row.as_ref().map(workflow_from_row).transpose()
    }

    async fn get_workflow_by_name(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<Option<StoredWorkflow>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflows WHERE user_id = ? AND name = ?")
            .bind(user_id)
            .bind(name)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;
        row.as_ref().map(workflow_from_row).transpose()
    }

    async fn list_workflows(&self, user_id: &str) -> Result<Vec<StoredWorkflow>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM workflows WHERE user_id = ? ORDER BY name ASC")
            .bind(user_id)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;
        rows.iter().map(workflow_from_row).collect()
    }

    async fn delete_workflow(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflow_executions
               (id, workflow_id, user_id, status, trigger_type, trigger_payload,
                execution_start, execution_end, paused_at_task, message)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(&execution.user_id)
        .bind(execution.status.as_str())
        .bind(execution.trigger.kind.to_string())
        .bind(to_json(&execution.trigger.payload)?)
        .bind(format_datetime(&execution.execution_start))
        .bind(execution.execution_end.as_ref().map(format_datetime))
        .bind(&execution.paused_at_task)
        .bind(&execution.message)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;
        row.as_ref().map(execution_from_row).transpose()
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE workflow_executions SET
                 status = ?, execution_end = ?, paused_at_task = ?, message = ?
               WHERE id = ?"#,
        )
        .bind(execution.status.as_str())
        .bind(execution.execution_end.as_ref().map(format_datetime))
        .bind(&execution.paused_at_task)
        .bind(&execution.message)
        .bind(execution.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_executions(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_executions WHERE workflow_id = ? ORDER BY execution_start DESC, id DESC LIMIT ?",
        )
        .bind(workflow_id.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;
        rows.iter().map(execution_from_row).collect()
    }

    async fn list_executions_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_executions WHERE status = ? ORDER BY execution_start ASC, id ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;
        rows.iter().map(execution_from_row).collect()
    }

    async fn upsert_task_execution(&self, task: &WorkflowTaskExecution) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflow_task_executions
               (id, execution_id, name, status, attempts, message, start_time, end_time)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(execution_id, name) DO UPDATE SET
                 status = excluded.status,
                 attempts = excluded.attempts,
                 message = excluded.message,
                 start_time = excluded.start_time,
                 end_time = excluded.end_time"#,
        )
        .bind(task.id.to_string())
        .bind(task.execution_id.to_string())
        .bind(&task.name)
        .bind(task.status.as_str())
        .bind(i64::from(task.attempts))
        .bind(&task.message)
        .bind(task.start_time.as_ref().map(format_datetime))
        .bind(task.end_time.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    async fn list_task_executions(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<WorkflowTaskExecution>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_task_executions WHERE execution_id = ? ORDER BY id ASC",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;
        rows.iter().map(task_from_row).collect()
    }

    async fn create_approval(&self, approval: &WorkflowApproval) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflow_approvals
               (id, workflow_id, execution_id, task_name, requested_by, requested_at,
                status, approver, decided_at, instructions)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(approval.id.to_string())
        .bind(approval.workflow_id.to_string())
        .bind(approval.execution_id.to_string())
        .bind(&approval.task_name)
        .bind(&approval.requested_by)
        .bind(format_datetime(&approval.requested_at))
        .bind(approval.status.as_str())
        .bind(&approval.approver)
        .bind(approval.decided_at.as_ref().map(format_datetime))
        .bind(&approval.instructions)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    async fn get_approval(&self, id: &Uuid) -> Result<Option<WorkflowApproval>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_approvals WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;
        row.as_ref().map(approval_from_row).transpose()
    }

    async fn decide_approval(
        &self,
        id: &Uuid,
        status: ApprovalStatus,
        approver: &str,
        decided_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE workflow_approvals SET status = ?, approver = ?, decided_at = ?
               WHERE id = ? AND status = ?"#,
        )
        .bind(status.as_str())
        .bind(approver)
        .bind(format_datetime(&decided_at))
        .bind(id.to_string())
        .bind(ApprovalStatus::Pending.as_str())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        // Distinguish "already decided" from "never existed".
        match self.get_approval(id).await? {
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn find_approval(
        &self,
        execution_id: &Uuid,
        task_name: &str,
    ) -> Result<Option<WorkflowApproval>, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT * FROM workflow_approvals WHERE execution_id = ? AND task_name = ?
               ORDER BY requested_at DESC, id DESC LIMIT 1"#,
        )
        .bind(execution_id.to_string())
        .bind(task_name)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;
        row.as_ref().map(approval_from_row).transpose()
    }

    async fn list_pending_approvals(&self) -> Result<Vec<WorkflowApproval>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_approvals WHERE status = ? ORDER BY requested_at ASC",
        )
        .bind(ApprovalStatus::Pending.as_str())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;
        rows.iter().map(approval_from_row).collect()
    }

    async fn save_trigger(&self, trigger: &WorkflowTrigger) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflow_triggers
               (id, workflow_id, user_id, trigger_type, properties, status, last_fired_at, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 properties = excluded.properties,
                 status = excluded.status,
                 last_fired_at = excluded.last_fired_at"#,
        )
        .bind(trigger.id.to_string())
        .bind(trigger.workflow_id.to_string())
        .bind(&trigger.user_id)
        .bind(trigger.trigger_type.to_string())
        .bind(to_json(&trigger.properties)?)
        .bind(trigger.status.as_str())
        .bind(trigger.last_fired_at.as_ref().map(format_datetime))
        .bind(format_datetime(&trigger.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    async fn list_triggers(&self, workflow_id: &Uuid) -> Result<Vec<WorkflowTrigger>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM workflow_triggers WHERE workflow_id = ? ORDER BY id ASC")
            .bind(workflow_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;
        rows.iter().map(trigger_from_row).collect()
    }

    async fn list_active_triggers(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<WorkflowTrigger>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_triggers WHERE trigger_type = ? AND status = ? ORDER BY id ASC",
        )
        .bind(trigger_type.to_string())
        .bind(TriggerStatus::Active.as_str())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;
        rows.iter().map(trigger_from_row).collect()
    }

    async fn delete_triggers(&self, workflow_id: &Uuid) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflow_triggers WHERE workflow_id = ?")
            .bind(workflow_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected())
    }

    async fn record_trigger_fired(&self, id: &Uuid, fired_at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE workflow_triggers SET last_fired_at = ? WHERE id = ?")
            .bind(format_datetime(&fired_at))
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}
