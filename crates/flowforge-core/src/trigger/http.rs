//! HTTP trigger route table.
//!
//! Routes are keyed by `(user_id, method, path)` in a `DashMap`: written
//! rarely (workflow registration) and read on every inbound request.
//! Registration is idempotent; the first registration of a key wins.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use flowforge_types::execution::{TriggerContext, WorkflowTrigger};
use flowforge_types::workflow::{TriggerConfig, TriggerType};
use serde_json::Value;
use uuid::Uuid;

use crate::repository::WorkflowRepository;
use crate::workflow::queue::ExecutionLauncher;

use super::TriggerError;

pub const ROUTE_PROPERTY: &str = "route";
pub const PATH_PROPERTY: &str = "path";
pub const METHOD_PROPERTY: &str = "method";
pub const DEFAULT_METHOD: &str = "post";

/// Normalised route address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub user_id: String,
    pub method: String,
    pub path: String,
}

impl RouteKey {
    pub fn new(user_id: impl Into<String>, method: &str, path: &str) -> Self {
        Self {
            user_id: user_id.into(),
            method: normalize_method(method),
            path: normalize_path(path),
        }
    }
}

/// Leading slash, no trailing slash, no empty segments.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

pub fn normalize_method(method: &str) -> String {
    let method = method.trim();
    if method.is_empty() {
        DEFAULT_METHOD.to_string()
    } else {
        method.to_lowercase()
    }
}

/// `(method, path)` declared by an Http trigger's properties.
pub fn route_of(properties: &TriggerConfig) -> Result<(String, String), TriggerError> {
    let path = properties
        .property(ROUTE_PROPERTY)
        .or_else(|| properties.property(PATH_PROPERTY))
        .ok_or(TriggerError::MissingProperty {
            trigger: TriggerType::Http.to_string(),
            property: ROUTE_PROPERTY,
        })?;
    let method = properties
        .property(METHOD_PROPERTY)
        .unwrap_or_else(|| DEFAULT_METHOD.to_string());
    Ok((normalize_method(&method), normalize_path(&path)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HttpRoute {
    workflow_id: Uuid,
}

pub struct HttpTriggerRegistry<R: WorkflowRepository> {
    routes: DashMap<RouteKey, HttpRoute>,
    launcher: Arc<ExecutionLauncher<R>>,
}

impl<R: WorkflowRepository> HttpTriggerRegistry<R> {
    pub fn new(launcher: Arc<ExecutionLauncher<R>>) -> Self {
        Self {
            routes: DashMap::new(),
            launcher,
        }
    }

    /// Returns `true` if the route was added, `false` if the key existed.
    pub fn register_route(&self, key: RouteKey, workflow_id: Uuid) -> bool {
        match self.routes.entry(key) {
            Entry::Occupied(existing) => {
                if existing.get().workflow_id != workflow_id {
                    tracing::warn!(
                        path = %existing.key().path,
                        method = %existing.key().method,
                        current = %existing.get().workflow_id,
                        requested = %workflow_id,
                        "http route already registered to another workflow"
                    );
                }
                false
            }
            Entry::Vacant(slot) => {
                tracing::debug!(path = %slot.key().path, method = %slot.key().method, %workflow_id, "http route registered");
                slot.insert(HttpRoute { workflow_id });
                true
            }
        }
    }

    /// Register the route declared by a persisted Http trigger.
    pub fn register_trigger(&self, trigger: &WorkflowTrigger) -> Result<bool, TriggerError> {
        let config = TriggerConfig {
            trigger_type: trigger.trigger_type,
            properties: trigger.properties.clone(),
        };
        let (method, path) = route_of(&config)?;
        Ok(self.register_route(
            RouteKey::new(trigger.user_id.clone(), &method, &path),
            trigger.workflow_id,
        ))
    }

    pub fn unregister_route(&self, key: &RouteKey) -> bool {
        self.routes.remove(key).is_some()
    }

    /// Drop every route of `workflow_id`. Returns how many were removed.
    pub fn unregister_workflow(&self, workflow_id: Uuid) -> usize {
        let before = self.routes.len();
        self.routes.retain(|_, route| route.workflow_id != workflow_id);
        before - self.routes.len()
    }

    /// Rebuild the table from active persisted Http triggers.
    pub async fn reload(&self, repo: &R) -> Result<usize, TriggerError> {
        let mut added = 0;
        for trigger in repo.list_active_triggers(TriggerType::Http).await? {
            match self.register_trigger(&trigger) {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(trigger_id = %trigger.id, error = %e, "skipping malformed http trigger");
                }
            }
        }
        tracing::info!(routes = added, "http trigger routes loaded");
        Ok(added)
    }

    pub fn lookup(&self, key: &RouteKey) -> Option<Uuid> {
        self.routes.get(key).map(|r| r.workflow_id)
    }

    /// Launch the workflow routed at `(user_id, method, path)` with `body` as
    /// trigger payload. `Ok(None)` when no route matches.
    pub async fn dispatch(
        &self,
        user_id: &str,
        method: &str,
        path: &str,
        body: Value,
    ) -> Result<Option<Uuid>, TriggerError> {
        let key = RouteKey::new(user_id, method, path);
        let Some(workflow_id) = self.lookup(&key) else {
            tracing::debug!(user_id, method = %key.method, path = %key.path, "no http route matched");
            return Ok(None);
        };

        let context = TriggerContext {
            kind: TriggerType::Http,
            payload: body,
        };
        let execution_id = self.launcher.launch(user_id, workflow_id, context).await?;
        Ok(Some(execution_id))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
