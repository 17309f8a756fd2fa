//! Per-execution state shared between the orchestrator and task executor.
//!
//! `ExecutionContext` records each task's latest status and output. It is
//! the source of the condition-evaluation context and of the result map
//! written to result storage. On resume it is rebuilt from persisted task
//! rows plus the stored results.

use std::collections::HashMap;

use flowforge_types::execution::{
    TaskStatus, TriggerContext, WorkflowExecution, WorkflowTaskExecution,
};
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Addressing information for one execution, used by result storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionScope {
    pub user_id: String,
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub scope: ExecutionScope,
    pub trigger: TriggerContext,
    statuses: HashMap<String, TaskStatus>,
    outputs: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(execution: &WorkflowExecution) -> Self {
        Self {
            scope: ExecutionScope {
                user_id: execution.user_id.clone(),
                workflow_id: execution.workflow_id,
                execution_id: execution.id,
            },
            trigger: execution.trigger.clone(),
            statuses: HashMap::new(),
            outputs: HashMap::new(),
        }
    }

    /// Rebuild from persisted task rows and previously saved results.
    pub fn restore(
        execution: &WorkflowExecution,
        tasks: &[WorkflowTaskExecution],
        results: Option<Map<String, Value>>,
    ) -> Self {
        let mut ctx = Self::new(execution);
        for task in tasks {
            ctx.statuses.insert(task.name.clone(), task.status);
        }
        if let Some(results) = results {
            ctx.outputs.extend(results);
        }
        ctx
    }

    pub fn status(&self, task: &str) -> Option<TaskStatus> {
        self.statuses.get(task).copied()
    }

    pub fn set_status(&mut self, task: &str, status: TaskStatus) {
        self.statuses.insert(task.to_string(), status);
    }

    pub fn set_output(&mut self, task: &str, output: Value) {
        self.outputs.insert(task.to_string(), output);
    }

    pub fn output(&self, task: &str) -> Option<&Value> {
        self.outputs.get(task)
    }

    /// Task outputs, as persisted by result storage.
    pub fn results(&self) -> Map<String, Value> {
        self.outputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Shape:
    /// ```json
    /// {
    ///   "tasks": { "<name>": { "status": "completed", "output": <value|null> } },
    ///   "trigger": <payload>,
    ///   "execution": { "id": "..." },
    ///   "workflow": { "id": "..." }
    /// }
    /// ```
    pub fn to_expression_context(&self) -> Value {
        let mut tasks = Map::new();
        for (name, status) in &self.statuses {
            tasks.insert(
                name.clone(),
                json!({
                    "status": status.as_str(),
                    "output": self.outputs.get(name).cloned().unwrap_or(Value::Null),
                }),
            );
        }

        json!({
            "tasks": tasks,
            "trigger": self.trigger.payload,
            "execution": { "id": self.scope.execution_id.to_string() },
            "workflow": { "id": self.scope.workflow_id.to_string() },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution() -> WorkflowExecution {
        WorkflowExecution::pending(
            Uuid::now_v7(),
            "alice",
            TriggerContext {
                kind: flowforge_types::workflow::TriggerType::Http,
                payload: json!({"ref": "main"}),
            },
        )
    }

    #[test]
    fn expression_context_shape() {
        let exec = execution();
        let mut ctx = ExecutionContext::new(&exec);
        ctx.set_status("fetch", TaskStatus::Completed);
        ctx.set_output("fetch", json!({"n": 1}));
        ctx.set_status("skip", TaskStatus::Canceled);

        let value = ctx.to_expression_context();
        assert_eq!(value["tasks"]["fetch"]["status"], "completed");
        assert_eq!(value["tasks"]["fetch"]["output"]["n"], 1);
        assert_eq!(value["tasks"]["skip"]["output"], Value::Null);
        assert_eq!(value["trigger"]["ref"], "main");
        assert_eq!(value["execution"]["id"], exec.id.to_string());
    }

    #[test]
    fn restore_merges_rows_and_results() {
        let exec = execution();
        let mut row = WorkflowTaskExecution::new(exec.id, "fetch");
        row.status = TaskStatus::Completed;
        let mut results = Map::new();
        results.insert("fetch".into(), json!([1, 2]));

        let ctx = ExecutionContext::restore(&exec, &[row], Some(results));
        assert_eq!(ctx.status("fetch"), Some(TaskStatus::Completed));
        assert_eq!(ctx.output("fetch"), Some(&json!([1, 2])));
        assert_eq!(ctx.scope.user_id, "alice");
        assert_eq!(ctx.results().len(), 1);
    }
}
