//! Polling processor for time triggers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flowforge_types::execution::{TriggerContext, WorkflowTrigger};
use flowforge_types::workflow::TriggerType;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::repository::WorkflowRepository;
use crate::workflow::queue::ExecutionLauncher;

use super::TriggerError;
use super::schedule::TimeSchedule;

/// Counters for one polling tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub evaluated: usize,
    pub fired: usize,
    pub failed: usize,
}

/// Reads active time triggers every `interval` and launches the due ones.
///
/// A trigger whose schedule cannot be parsed, or whose launch fails, is
/// logged and counted; the remaining triggers are still evaluated.
pub struct TimeTriggerProcessor<R: WorkflowRepository> {
    repo: Arc<R>,
    launcher: Arc<ExecutionLauncher<R>>,
    interval: Duration,
}

impl<R: WorkflowRepository> TimeTriggerProcessor<R> {
    pub fn new(repo: Arc<R>, launcher: Arc<ExecutionLauncher<R>>, interval: Duration) -> Self {
        Self {
            repo,
            launcher,
            interval,
        }
    }

    /// Evaluate every active time trigger against `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, TriggerError> {
        let triggers = self.repo.list_active_triggers(TriggerType::Time).await?;
        let mut report = TickReport::default();

        for trigger in &triggers {
            report.evaluated += 1;
            match self.fire_if_due(trigger, now).await {
                Ok(true) => report.fired += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        trigger_id = %trigger.id,
                        workflow_id = %trigger.workflow_id,
                        error = %e,
                        "time trigger evaluation failed"
                    );
                }
            }
        }

        if report.fired > 0 || report.failed > 0 {
            tracing::info!(
                evaluated = report.evaluated,
                fired = report.fired,
                failed = report.failed,
                "time trigger tick"
            );
        }
        Ok(report)
    }

    async fn fire_if_due(
        &self,
        trigger: &WorkflowTrigger,
        now: DateTime<Utc>,
    ) -> Result<bool, TriggerError> {
        let schedule = TimeSchedule::of_trigger(trigger)?;
        let Some(scheduled_for) =
            schedule.due_occurrence(trigger.last_fired_at, trigger.created_at, now)
        else {
            return Ok(false);
        };

        let context = TriggerContext {
            kind: TriggerType::Time,
            payload: json!({
                "triggerId": trigger.id,
                "schedule": schedule.expression(),
                "scheduledFor": scheduled_for,
                "firedAt": now,
            }),
        };
        let execution_id = self
            .launcher
            .launch(&trigger.user_id, trigger.workflow_id, context)
            .await?;
        self.repo.record_trigger_fired(&trigger.id, now).await?;

        tracing::debug!(trigger_id = %trigger.id, %execution_id, %scheduled_for, "time trigger fired");
        Ok(true)
    }

    /// Poll until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick(Utc::now()).await {
                            tracing::error!(error = %e, "time trigger poll failed");
                        }
                    }
                }
            }
            tracing::info!("time trigger processor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryWorkflowRepository;
    use crate::test_support::{definition, task};
    use crate::workflow::queue::ExecutionQueue;
    use chrono::TimeZone;
    use flowforge_types::execution::TriggerStatus;
    use flowforge_types::workflow::StoredWorkflow;
    use std::collections::HashMap;
    use uuid::Uuid;

    async fn stored(repo: &InMemoryWorkflowRepository) -> Uuid {
        let workflow = StoredWorkflow {
            id: Uuid::now_v7(),
            user_id: "alice".into(),
            name: format!("nightly-{}", Uuid::now_v7()),
            definition: definition(vec![task("a", &[])]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        repo.save_workflow(&workflow).await.unwrap();
        workflow.id
    }

    fn trigger(workflow_id: Uuid, key: &str, value: &str, created_at: DateTime<Utc>) -> WorkflowTrigger {
        let mut properties = HashMap::new();
        properties.insert(key.to_string(), json!(value));
        WorkflowTrigger {
            id: Uuid::now_v7(),
            workflow_id,
            user_id: "alice".into(),
            trigger_type: TriggerType::Time,
            properties,
            status: TriggerStatus::Active,
            last_fired_at: None,
            created_at,
        }
    }

    #[tokio::test]
    async fn due_triggers_fire_once_and_bad_ones_are_isolated() {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let (queue, _rx) = ExecutionQueue::new(16);
        let launcher = Arc::new(ExecutionLauncher::new(Arc::clone(&repo), queue));
        let processor = TimeTriggerProcessor::new(Arc::clone(&repo), launcher, Duration::from_secs(30));

        let created = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 30).unwrap();
        let workflow_id = stored(&repo).await;
        let good = trigger(workflow_id, "cron", "*/5 * * * *", created);
        let broken = trigger(workflow_id, "schedule", "whenever", created);
        repo.save_trigger(&broken).await.unwrap();
        repo.save_trigger(&good).await.unwrap();

        let now = Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap();
        let report = processor.tick(now).await.unwrap();
        assert_eq!(report, TickReport { evaluated: 2, fired: 1, failed: 1 });
        assert_eq!(repo.list_executions(&workflow_id, 10).await.unwrap().len(), 1);

        // Same instant again: already fired, nothing due.
        let report = processor.tick(now).await.unwrap();
        assert_eq!(report.fired, 0);
        assert_eq!(repo.list_executions(&workflow_id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn full_queue_does_not_stall_the_tick() {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let (queue, _rx) = ExecutionQueue::new(1);
        let launcher = Arc::new(ExecutionLauncher::new(Arc::clone(&repo), queue));
        let processor = TimeTriggerProcessor::new(Arc::clone(&repo), launcher, Duration::from_secs(30));

        let created = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 30).unwrap();
        let workflow_id = stored(&repo).await;
        let first = trigger(workflow_id, "cron", "*/5 * * * *", created);
        let second = trigger(workflow_id, "cron", "*/10 * * * *", created);
        repo.save_trigger(&first).await.unwrap();
        repo.save_trigger(&second).await.unwrap();

        let now = Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap();
        let report = tokio::time::timeout(Duration::from_millis(500), processor.tick(now))
            .await
            .expect("tick must finish while the queue is full")
            .unwrap();
        assert_eq!(report, TickReport { evaluated: 2, fired: 1, failed: 1 });

        // The trigger that could not be enqueued is not marked fired, so the
        // next tick tries it again.
        let unfired: Vec<_> = repo
            .list_active_triggers(TriggerType::Time)
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.last_fired_at.is_none())
            .collect();
        assert_eq!(unfired.len(), 1);
    }

    #[tokio::test]
    async fn not_due_before_first_occurrence() {
        let repo = Arc::new(InMemoryWorkflowRepository::new());
        let (queue, _rx) = ExecutionQueue::new(4);
        let launcher = Arc::new(ExecutionLauncher::new(Arc::clone(&repo), queue));
        let processor = TimeTriggerProcessor::new(Arc::clone(&repo), launcher, Duration::from_secs(30));

        let created = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let workflow_id = stored(&repo).await;
        repo.save_trigger(&trigger(workflow_id, "schedule", "daily", created))
            .await
            .unwrap();

        let report = processor
            .tick(Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(report.fired, 0);
    }
}
