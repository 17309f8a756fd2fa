//! Shared fixtures for unit tests: definition builders and a scripted plugin.
//!
//! The scripted unit reads its behaviour from the task parameters:
//! - `fail: true` fails every call
//! - `failTimes: n` fails the first `n` calls for that task
//! - `sleepMs: n` sleeps before answering
//! - `output: <value>` is returned on success
//!
//! Every call is recorded (by the `task` parameter, else the operation name)
//! in invocation order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flowforge_types::plugin::{
    PluginManifest, PluginRef, PluginRuntime, PluginSpecification, SpecType,
};
use flowforge_types::workflow::{WorkflowConfiguration, WorkflowDefinition, WorkflowTask};
use serde_json::{Map, Value, json};

use chrono::{DateTime, Utc};
use flowforge_types::error::RepositoryError;
use flowforge_types::execution::{
    ApprovalStatus, ExecutionStatus, WorkflowApproval, WorkflowExecution, WorkflowTaskExecution,
    WorkflowTrigger,
};
use flowforge_types::workflow::{StoredWorkflow, TriggerType};
use uuid::Uuid;

use crate::plugin::{InstalledPlugin, LoadableUnit, PluginError, PluginLoader, PluginSource};
use crate::repository::{InMemoryWorkflowRepository, WorkflowRepository};

pub(crate) fn plugin_ref(name: &str) -> PluginRef {
    PluginRef {
        name: name.to_string(),
        version: "1.0.0".to_string(),
        namespace: "default".to_string(),
    }
}

/// A task on the scripted plugin with `parameters.task = name`.
pub(crate) fn task(name: &str, deps: &[&str]) -> WorkflowTask {
    let mut parameters = Map::new();
    parameters.insert("task".into(), json!(name));
    WorkflowTask {
        name: name.to_string(),
        description: None,
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
        when: None,
        retry: None,
        timeout: None,
        plugin_ref: plugin_ref("scripted"),
        operation: None,
        parameters,
        on_failure: None,
        manual_approval: None,
    }
}

pub(crate) fn definition(tasks: Vec<WorkflowTask>) -> WorkflowDefinition {
    WorkflowDefinition {
        name: "test-workflow".to_string(),
        description: None,
        configuration: WorkflowConfiguration::default(),
        tasks,
    }
}

// ---------------------------------------------------------------------------
// FakeSource
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub(crate) struct FakeSource {
    installs: Arc<AtomicUsize>,
    uninstalls: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    delay: Duration,
    required: Option<String>,
    operations: Vec<String>,
    failing: bool,
}

impl FakeSource {
    /// Manifest declares `name` as a required parameter.
    pub(crate) fn with_required(name: &str) -> Self {
        Self {
            required: Some(name.to_string()),
            ..Self::default()
        }
    }

    /// Manifest lists exactly `operations`.
    pub(crate) fn with_operations(operations: &[&str]) -> Self {
        Self {
            operations: operations.iter().map(|o| o.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Every install takes `delay`.
    pub(crate) fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub(crate) fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    pub(crate) fn uninstalls(&self) -> usize {
        self.uninstalls.load(Ordering::SeqCst)
    }

    /// Most installs ever observed in flight together.
    pub(crate) fn max_concurrent_installs(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl PluginSource for FakeSource {
    async fn ensure_installed(&self, plugin: &PluginRef) -> Result<InstalledPlugin, PluginError> {
        if self.failing {
            return Err(PluginError::Fetch {
                plugin: plugin.to_string(),
                message: "registry unreachable".into(),
            });
        }
        self.installs.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        let specifications = self
            .required
            .iter()
            .map(|name| PluginSpecification {
                name: name.clone(),
                spec_type: SpecType::String,
                required: true,
            })
            .collect();
        Ok(InstalledPlugin {
            plugin: plugin.clone(),
            path: PathBuf::from("/plugins").join(&plugin.namespace).join(&plugin.name),
            manifest: PluginManifest {
                name: plugin.name.clone(),
                version: plugin.version.clone(),
                runtime: PluginRuntime::Process,
                entrypoint: "run".into(),
                description: None,
                operations: self.operations.clone(),
                specifications,
            },
        })
    }

    async fn uninstall(&self, _plugin: &PluginRef) -> Result<(), PluginError> {
        self.uninstalls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeLoader / scripted unit
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub(crate) struct FakeLoader {
    loads: Arc<AtomicUsize>,
    state: Arc<ScriptState>,
}

#[derive(Default)]
struct ScriptState {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, u64>>,
}

impl FakeLoader {
    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Invocation labels in call order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.calls.lock().unwrap().clone()
    }
}

impl PluginLoader for FakeLoader {
    type Unit = ScriptedUnit;

    async fn load(&self, _plugin: &InstalledPlugin) -> Result<ScriptedUnit, PluginError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedUnit {
            state: Arc::clone(&self.state),
        })
    }
}

pub(crate) struct ScriptedUnit {
    state: Arc<ScriptState>,
}

impl LoadableUnit for ScriptedUnit {
    async fn invoke(
        &self,
        operation: &str,
        parameters: &Map<String, Value>,
    ) -> Result<Value, PluginError> {
        let label = parameters
            .get("task")
            .and_then(Value::as_str)
            .unwrap_or(operation)
            .to_string();
        self.state.calls.lock().unwrap().push(label.clone());

        if let Some(ms) = parameters.get("sleepMs").and_then(Value::as_u64) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        if parameters.get("fail").and_then(Value::as_bool) == Some(true) {
            return Err(PluginError::Invoke(format!("{label}: scripted failure")));
        }

        if let Some(limit) = parameters.get("failTimes").and_then(Value::as_u64) {
            let mut failures = self.state.failures.lock().unwrap();
            let seen = failures.entry(label.clone()).or_insert(0);
            if *seen < limit {
                *seen += 1;
                return Err(PluginError::Invoke(format!("{label}: failure {seen}/{limit}")));
            }
        }

        Ok(parameters
            .get("output")
            .cloned()
            .unwrap_or_else(|| json!({ "task": label, "operation": operation })))
    }

    async fn unload(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FlakyRepository
// ---------------------------------------------------------------------------

/// In-memory repository whose task-row writes can be made to fail.
#[derive(Default)]
pub(crate) struct FlakyRepository {
    inner: InMemoryWorkflowRepository,
    failing_task_writes: AtomicUsize,
}

impl FlakyRepository {
    /// Fail the next `count` task-row writes with a connection error.
    pub(crate) fn fail_task_writes(&self, count: usize) {
        self.failing_task_writes.store(count, Ordering::SeqCst);
    }
}

impl WorkflowRepository for FlakyRepository {
    async fn save_workflow(&self, workflow: &StoredWorkflow) -> Result<(), RepositoryError> {
        self.inner.save_workflow(workflow).await
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<StoredWorkflow>, RepositoryError> {
        self.inner.get_workflow(id).await
    }

    async fn get_workflow_by_name(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<Option<StoredWorkflow>, RepositoryError> {
        self.inner.get_workflow_by_name(user_id, name).await
    }

    async fn list_workflows(&self, user_id: &str) -> Result<Vec<StoredWorkflow>, RepositoryError> {
        self.inner.list_workflows(user_id).await
    }

    async fn delete_workflow(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        self.inner.delete_workflow(id).await
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        self.inner.create_execution(execution).await
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        self.inner.get_execution(id).await
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        self.inner.update_execution(execution).await
    }

    async fn list_executions(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        self.inner.list_executions(workflow_id, limit).await
    }

    async fn list_executions_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        self.inner.list_executions_by_status(status).await
    }

    async fn upsert_task_execution(&self, task: &WorkflowTaskExecution) -> Result<(), RepositoryError> {
        let failing = self
            .failing_task_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RepositoryError::Connection);
        }
        self.inner.upsert_task_execution(task).await
    }

    async fn list_task_executions(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<WorkflowTaskExecution>, RepositoryError> {
        self.inner.list_task_executions(execution_id).await
    }

    async fn create_approval(&self, approval: &WorkflowApproval) -> Result<(), RepositoryError> {
        self.inner.create_approval(approval).await
    }

    async fn get_approval(&self, id: &Uuid) -> Result<Option<WorkflowApproval>, RepositoryError> {
        self.inner.get_approval(id).await
    }

    async fn decide_approval(
        &self,
        id: &Uuid,
        status: ApprovalStatus,
        approver: &str,
        decided_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        self.inner.decide_approval(id, status, approver, decided_at).await
    }

    async fn find_approval(
        &self,
        execution_id: &Uuid,
        task_name: &str,
    ) -> Result<Option<WorkflowApproval>, RepositoryError> {
        self.inner.find_approval(execution_id, task_name).await
    }

    async fn list_pending_approvals(&self) -> Result<Vec<WorkflowApproval>, RepositoryError> {
        self.inner.list_pending_approvals().await
    }

    async fn save_trigger(&self, trigger: &WorkflowTrigger) -> Result<(), RepositoryError> {
        self.inner.save_trigger(trigger).await
    }

    async fn list_triggers(&self, workflow_id: &Uuid) -> Result<Vec<WorkflowTrigger>, RepositoryError> {
        self.inner.list_triggers(workflow_id).await
    }

    async fn list_active_triggers(
        &self,
        trigger_type: TriggerType,
    ) -> Result<Vec<WorkflowTrigger>, RepositoryError> {
        self.inner.list_active_triggers(trigger_type).await
    }

    async fn delete_triggers(&self, workflow_id: &Uuid) -> Result<u64, RepositoryError> {
        self.inner.delete_triggers(workflow_id).await
    }

    async fn record_trigger_fired(&self, id: &Uuid, fired_at: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.inner.record_trigger_fired(id, fired_at).await
    }
}
