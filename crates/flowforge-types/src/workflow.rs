//! Workflow definition types.
//!
//! `WorkflowDefinition` is the declarative task graph accepted from users (or
//! generated by external tools). It is deserialised from camelCase JSON and
//! carries no identity of its own; persisted copies are wrapped in
//! [`StoredWorkflow`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plugin::PluginRef;

/// Default plugin operation invoked when a task does not name one.
pub const DEFAULT_OPERATION: &str = "execute";

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A declarative workflow: a named set of tasks plus trigger configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Unique per owner.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub configuration: WorkflowConfiguration,
    /// Tasks in declaration order. Dispatch order among ready siblings
    /// follows this order.
    #[serde(default)]
    pub tasks: Vec<WorkflowTask>,
}

impl WorkflowDefinition {
    /// Look up a task by name.
    pub fn task(&self, name: &str) -> Option<&WorkflowTask> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Triggers of the given type.
    pub fn triggers_of(&self, trigger_type: TriggerType) -> impl Iterator<Item = &TriggerConfig> {
        self.configuration
            .triggers
            .iter()
            .filter(move |t| t.trigger_type == trigger_type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConfiguration {
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
}

/// Trigger declaration inside a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

impl TriggerConfig {
    /// String property lookup. Non-string values are rendered as JSON text.
    pub fn property(&self, key: &str) -> Option<String> {
        property_string(&self.properties, key)
    }
}

/// Read a string-ish property from a trigger property map.
pub fn property_string(
    properties: &HashMap<String, serde_json::Value>,
    key: &str,
) -> Option<String> {
    properties.get(key).map(|v| match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerType {
    Manual,
    Time,
    Http,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerType::Manual => "Manual",
            TriggerType::Time => "Time",
            TriggerType::Http => "Http",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Manual" | "manual" => Ok(TriggerType::Manual),
            "Time" | "time" => Ok(TriggerType::Time),
            "Http" | "http" => Ok(TriggerType::Http),
            other => Err(format!("unknown trigger type: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// A single node of the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTask {
    /// Unique within the definition.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Names of tasks that must reach a terminal state first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// JEXL condition. Evaluated against the execution context before the
    /// task is invoked; a falsy result skips the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Per-attempt timeout in milliseconds. `None` or 0 means no timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    pub plugin_ref: PluginRef,
    /// Plugin operation to call. Defaults to [`DEFAULT_OPERATION`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<FailurePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_approval: Option<ManualApproval>,
}

impl WorkflowTask {
    pub fn operation(&self) -> &str {
        self.operation.as_deref().unwrap_or(DEFAULT_OPERATION)
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.on_failure.clone().unwrap_or_default()
    }

    /// Whether this task waits for a human decision before its first run.
    pub fn requires_approval(&self) -> bool {
        self.manual_approval.as_ref().is_some_and(|a| a.enabled)
    }

    /// Total attempts allowed, never less than one.
    pub fn max_attempts(&self) -> u32 {
        self.retry.as_ref().map_or(1, |r| r.max_attempts.max(1))
    }
}

/// Retry configuration. All durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub delay: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Upper bound on a single wait. 0 disables the cap.
    #[serde(default)]
    pub max_delay: u64,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay: 0,
            backoff_multiplier: default_backoff_multiplier(),
            max_delay: 0,
        }
    }
}

/// What happens once a task has exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "camelCase")]
pub enum FailurePolicy {
    /// Mark the task Failed and let the orchestrator fail its dependents.
    #[default]
    Propagate,
    /// Invoke another operation on the same plugin; its result stands in
    /// for the failed one.
    #[serde(rename_all = "camelCase")]
    Fallback {
        operation: String,
        #[serde(default)]
        parameters: serde_json::Map<String, serde_json::Value>,
    },
    /// Open a breaker after `failure_threshold` consecutive failed runs and
    /// short-circuit for `cooldown` milliseconds.
    #[serde(rename_all = "camelCase")]
    CircuitBreaker {
        #[serde(default = "default_failure_threshold")]
        failure_threshold: u32,
        #[serde(default = "default_cooldown")]
        cooldown: u64,
    },
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown() -> u64 {
    30_000
}

/// Manual approval gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualApproval {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub approvers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Stored workflow
// ---------------------------------------------------------------------------

/// A definition persisted for an owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredWorkflow {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub definition: WorkflowDefinition,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
