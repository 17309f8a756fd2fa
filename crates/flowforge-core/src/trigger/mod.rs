//! Trigger processors: time-based polling and the HTTP route table.
//!
//! Neither processor runs workflows itself. Both hand fired triggers to the
//! [`ExecutionLauncher`](crate::workflow::queue::ExecutionLauncher), which
//! records a `Pending` execution and enqueues it.

pub mod http;
pub mod schedule;
pub mod time;

use flowforge_types::error::RepositoryError;
use thiserror::Error;

use crate::workflow::queue::LaunchError;

pub use http::{HttpTriggerRegistry, RouteKey};
pub use schedule::{TimeSchedule, normalize_schedule};
pub use time::{TickReport, TimeTriggerProcessor};

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("trigger {trigger} is missing property '{property}'")]
    MissingProperty {
        trigger: String,
        property: &'static str,
    },

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
