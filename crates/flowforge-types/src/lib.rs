//! Shared domain types for Flowforge.
//!
//! Workflow definitions, execution records, plugin manifests and engine
//! configuration. Zero infrastructure dependencies -- only serde, uuid,
//! chrono, semver, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod plugin;
pub mod workflow;
