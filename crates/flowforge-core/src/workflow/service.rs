//! Workflow registration.
//!
//! Registering a definition validates it, persists it (upserting by
//! `(user_id, name)`), and replaces its persisted Time/Http triggers. HTTP
//! routes are synced into the live route table when one is attached.

use std::sync::Arc;

use chrono::Utc;
use flowforge_types::error::RepositoryError;
use flowforge_types::execution::{TriggerStatus, WorkflowTrigger};
use flowforge_types::workflow::{StoredWorkflow, TriggerType, WorkflowDefinition};
use thiserror::Error;
use uuid::Uuid;

use crate::repository::WorkflowRepository;
use crate::trigger::http::{HttpTriggerRegistry, route_of};
use crate::trigger::schedule::TimeSchedule;
use crate::trigger::TriggerError;

use super::validator::{ValidationError, validate};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid workflow: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Invalid(Vec<ValidationError>),

    #[error("invalid trigger: {0}")]
    Trigger(#[from] TriggerError),

    #[error("workflow not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct WorkflowService<R: WorkflowRepository> {
    repo: Arc<R>,
    http: Option<Arc<HttpTriggerRegistry<R>>>,
}

impl<R: WorkflowRepository> WorkflowService<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo, http: None }
    }

    /// Keep `registry` in sync with registered Http triggers.
    pub fn with_http_registry(mut self, registry: Arc<HttpTriggerRegistry<R>>) -> Self {
        self.http = Some(registry);
        self
    }

    /// Validate and persist `definition` for `user_id`.
    ///
    /// Re-registering a name keeps the workflow id and creation time.
    pub async fn register(
        &self,
        user_id: &str,
        definition: WorkflowDefinition,
    ) -> Result<StoredWorkflow, ServiceError> {
        validate(&definition)
            .into_result()
            .map_err(ServiceError::Invalid)?;
        check_triggers(&definition)?;

        let now = Utc::now();
        let existing = self
            .repo
            .get_workflow_by_name(user_id, &definition.name)
            .await?;
        let stored = StoredWorkflow {
            id: existing.as_ref().map_or_else(Uuid::now_v7, |w| w.id),
            user_id: user_id.to_string(),
            name: definition.name.clone(),
            definition,
            created_at: existing.as_ref().map_or(now, |w| w.created_at),
            updated_at: now,
        };
        self.repo.save_workflow(&stored).await?;
        let triggers = self.sync_triggers(&stored).await?;

        tracing::info!(
            workflow_id = %stored.id,
            user_id,
            name = %stored.name,
            tasks = stored.definition.tasks.len(),
            triggers,
            updated = existing.is_some(),
            "workflow registered"
        );
        Ok(stored)
    }

    /// Replace the persisted triggers of `workflow`. Returns how many were saved.
    async fn sync_triggers(&self, workflow: &StoredWorkflow) -> Result<usize, ServiceError> {
        self.repo.delete_triggers(&workflow.id).await?;
        if let Some(http) = &self.http {
            http.unregister_workflow(workflow.id);
        }

        let mut saved = 0;
        for config in &workflow.definition.configuration.triggers {
            if config.trigger_type == TriggerType::Manual {
                continue;
            }
            let trigger = WorkflowTrigger {
                id: Uuid::now_v7(),
                workflow_id: workflow.id,
                user_id: workflow.user_id.clone(),
                trigger_type: config.trigger_type,
                properties: config.properties.clone(),
                status: TriggerStatus::Active,
                last_fired_at: None,
                created_at: Utc::now(),
            };
            self.repo.save_trigger(&trigger).await?;
            if trigger.trigger_type == TriggerType::Http
                && let Some(http) = &self.http
            {
                http.register_trigger(&trigger)?;
            }
            saved += 1;
        }
        Ok(saved)
    }

    pub async fn get(&self, user_id: &str, id: &Uuid) -> Result<StoredWorkflow, ServiceError> {
        self.repo
            .get_workflow(id)
            .await?
            .filter(|w| w.user_id == user_id)
            .ok_or(ServiceError::NotFound(*id))
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<StoredWorkflow>, ServiceError> {
        Ok(self.repo.list_workflows(user_id).await?)
    }

    /// Delete a workflow and its triggers.
    pub async fn remove(&self, user_id: &str, id: &Uuid) -> Result<(), ServiceError> {
        let workflow = self.get(user_id, id).await?;
        self.repo.delete_triggers(&workflow.id).await?;
        if let Some(http) = &self.http {
            http.unregister_workflow(workflow.id);
        }
        self.repo.delete_workflow(&workflow.id).await?;
        tracing::info!(workflow_id = %workflow.id, user_id, "workflow removed");
        Ok(())
    }
}

/// Reject trigger declarations the processors could not act on.
fn check_triggers(definition: &WorkflowDefinition) -> Result<(), TriggerError> {
    for config in &definition.configuration.triggers {
        match config.trigger_type {
            TriggerType::Time => {
                TimeSchedule::of_config(config)?;
            }
            TriggerType::Http => {
                route_of(config)?;
            }
            TriggerType::Manual => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryWorkflowRepository;
    use crate::test_support::{definition, task};
    use crate::trigger::http::RouteKey;
    use crate::workflow::queue::{ExecutionLauncher, ExecutionQueue};
    use flowforge_types::workflow::TriggerConfig;
    use serde_json::json;
    use std::collections::HashMap;

    fn trigger(trigger_type: TriggerType, properties: &[(&str, &str)]) -> TriggerConfig {
        TriggerConfig {
            trigger_type,
            properties: properties
                .iter()
                .map(|(k, v)| (k.to_string(), json!(v)))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[tokio::test]
    async fn invalid_definitions_are_not_persisted() {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let service = WorkflowService::new(Arc::clone(&repo));

        let bad = definition(vec![task("a", &["b"]), task("b", &["a"]), task("c", &["ghost"])]);
        match service.register("alice", bad).await {
            Err(ServiceError::Invalid(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation errors, got {other:?}"),
        }
        assert!(service.list("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_schedules_are_rejected() {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let service = WorkflowService::new(repo);
        let mut def = definition(vec![task("a", &[])]);
        def.configuration.triggers = vec![trigger(TriggerType::Time, &[("schedule", "now and then")])];

        assert!(matches!(
            service.register("alice", def).await,
            Err(ServiceError::Trigger(TriggerError::InvalidSchedule(_)))
        ));
    }

    #[tokio::test]
    async fn reregistering_keeps_identity_and_replaces_triggers() {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let (queue, _rx) = ExecutionQueue::new(4);
        let launcher = Arc::new(ExecutionLauncher::new(Arc::clone(&repo), queue));
        let http = Arc::new(HttpTriggerRegistry::new(launcher));
        let service = WorkflowService::new(Arc::clone(&repo)).with_http_registry(Arc::clone(&http));

        let mut def = definition(vec![task("a", &[])]);
        def.configuration.triggers = vec![
            trigger(TriggerType::Time, &[("cron", "0 2 * * *")]),
            trigger(TriggerType::Http, &[("route", "/run"), ("method", "POST")]),
            trigger(TriggerType::Manual, &[]),
        ];
        let first = service.register("alice", def.clone()).await.unwrap();
        assert_eq!(repo.list_triggers(&first.id).await.unwrap().len(), 2);
        assert_eq!(http.lookup(&RouteKey::new("alice", "post", "/run")), Some(first.id));

        def.configuration.triggers = vec![trigger(TriggerType::Http, &[("route", "/go")])];
        let second = service.register("alice", def).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(repo.list_triggers(&first.id).await.unwrap().len(), 1);
        assert!(http.lookup(&RouteKey::new("alice", "post", "/run")).is_none());
        assert_eq!(http.lookup(&RouteKey::new("alice", "post", "/go")), Some(first.id));

        service.remove("alice", &first.id).await.unwrap();
        assert!(http.is_empty());
        assert!(matches!(
            service.get("alice", &first.id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn workflows_are_scoped_to_their_owner() {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let service = WorkflowService::new(repo);
        let stored = service
            .register("alice", definition(vec![task("a", &[])]))
            .await
            .unwrap();

        assert!(service.get("alice", &stored.id).await.is_ok());
        assert!(matches!(
            service.get("bob", &stored.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(service.list("bob").await.unwrap().is_empty());
    }
}
