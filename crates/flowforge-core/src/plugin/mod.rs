//! Plugin host: resolves a task's `PluginRef` to a loaded, invocable unit.
//!
//! The pipeline is checksum validation -> download/extract (a [`PluginSource`])
//! -> load (a [`PluginLoader`]) -> cache. Infrastructure supplies the source
//! and loader implementations; this module owns the cache and the lifecycle
//! of loaded units.

pub mod cache;
pub mod checksum;
pub mod host;
pub mod loader;
pub mod specification;

use thiserror::Error;

pub use cache::{CacheIndex, CacheItem, PluginCache, PluginLease, generate_key};
pub use host::PluginHost;
pub use loader::{
    BoxPluginLoader, BoxPluginSource, InstalledPlugin, LoadableUnit, PluginLoader, PluginSource,
};

/// Plugin resolution and invocation errors.
///
/// Everything except `Invoke` is raised while resolving a unit, including an
/// operation the manifest does not list; the executor never retries those.
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    #[error("checksum mismatch for {plugin}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        plugin: String,
        expected: String,
        actual: String,
    },

    #[error("registry fetch failed for {plugin}: {message}")]
    Fetch { plugin: String, message: String },

    #[error("failed to extract {plugin}: {message}")]
    Extract { plugin: String, message: String },

    #[error("invalid plugin manifest: {0}")]
    Manifest(String),

    #[error("parameters do not match plugin specification: {}", .0.join("; "))]
    SpecificationMismatch(Vec<String>),

    #[error("plugin does not support operation '{0}'")]
    UnsupportedOperation(String),

    #[error("failed to load plugin: {0}")]
    Load(String),

    #[error("plugin invocation failed: {0}")]
    Invoke(String),

    #[error("failed to unload plugin: {0}")]
    Unload(String),
}
