//! Business logic and port traits for Flowforge.
//!
//! This crate defines the ports (repository, result storage, plugin source
//! and loader traits) that `flowforge-infra` implements. It depends only on
//! `flowforge-types`, never on `flowforge-infra` or any database/IO crate.

pub mod event;
pub mod plugin;
pub mod repository;
pub mod storage;
pub mod trigger;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_support;
