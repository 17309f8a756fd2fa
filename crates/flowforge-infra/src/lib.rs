//! Infrastructure layer for Flowforge.
//!
//! Implements the ports defined in `flowforge-core`: SQLite persistence,
//! the plugin registry source and runtimes, filesystem result storage, and
//! the configuration loader.

pub mod config;
pub mod plugin;
pub mod sqlite;
pub mod storage;
