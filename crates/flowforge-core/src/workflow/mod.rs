//! Workflow engine core.
//!
//! - `graph` / `validator` -- dependency graph and structural validation
//! - `condition` / `context` -- JEXL `when` clauses over execution state
//! - `retry` / `circuit` -- failure handling for one task
//! - `executor` -- runs a single task through the plugin host
//! - `orchestrator` -- walks the graph of one execution, pauses for approvals
//! - `approval` -- manual approval gate
//! - `queue` -- execution request queue and launcher
//! - `service` -- workflow registration

pub mod approval;
pub mod circuit;
pub mod condition;
pub mod context;
pub mod executor;
pub mod graph;
pub mod orchestrator;
pub mod queue;
pub mod retry;
pub mod service;
pub mod validator;
