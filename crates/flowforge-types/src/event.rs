//! Engine lifecycle events published on the event bus.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::{ExecutionStatus, TaskStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    ExecutionStarted {
        execution_id: Uuid,
        workflow_id: Uuid,
        resumed: bool,
    },
    TaskDispatched {
        execution_id: Uuid,
        task: String,
    },
    TaskFinished {
        execution_id: Uuid,
        task: String,
        status: TaskStatus,
    },
    ExecutionPaused {
        execution_id: Uuid,
        task: String,
        approval_id: Uuid,
    },
    ExecutionFinished {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

impl EngineEvent {
    pub fn execution_id(&self) -> Uuid {
        match self {
            EngineEvent::ExecutionStarted { execution_id, .. }
            | EngineEvent::TaskDispatched { execution_id, .. }
            | EngineEvent::TaskFinished { execution_id, .. }
            | EngineEvent::ExecutionPaused { execution_id, .. }
            | EngineEvent::ExecutionFinished { execution_id, .. } => *execution_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged() {
        let event = EngineEvent::TaskFinished {
            execution_id: Uuid::nil(),
            task: "fetch".into(),
            status: TaskStatus::Completed,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "task_finished");
        assert_eq!(json["status"], "completed");
        assert_eq!(event.execution_id(), Uuid::nil());
    }
}
