//! Plugin source and loader ports, plus their object-safe wrappers.
//!
//! The traits use native async (RPITIT). Each has a `*Dyn` twin with boxed
//! futures and a blanket impl, so the host can hold runtime-selected
//! implementations:
//! 1. `PluginLoader` / `PluginSource` are implemented by infrastructure
//! 2. `PluginLoaderDyn` / `PluginSourceDyn` are blanket-implemented for them
//! 3. `BoxPluginLoader` / `BoxPluginSource` wrap the trait objects

use std::future::Future;
use std::path::PathBuf;

use flowforge_types::plugin::{PluginManifest, PluginRef};
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use super::PluginError;

/// A package extracted to its versioned directory.
#[derive(Debug, Clone, PartialEq)]
pub struct InstalledPlugin {
    pub plugin: PluginRef,
    /// Package root, e.g. `{plugins}/{namespace}/{name}/{version}`.
    pub path: PathBuf,
    pub manifest: PluginManifest,
}

impl InstalledPlugin {
    pub fn entrypoint(&self) -> PathBuf {
        self.path.join(&self.manifest.entrypoint)
    }
}

// ---------------------------------------------------------------------------
// LoadableUnit
// ---------------------------------------------------------------------------

/// A loaded plugin instance.
pub trait LoadableUnit: Send + Sync + 'static {
    fn invoke(
        &self,
        operation: &str,
        parameters: &Map<String, Value>,
    ) -> impl Future<Output = Result<Value, PluginError>> + Send;

    /// Release resources. Called exactly once, after the last in-flight
    /// invocation has finished.
    fn unload(&self) -> impl Future<Output = Result<(), PluginError>> + Send;
}

pub trait LoadableUnitDyn: Send + Sync {
    fn invoke_boxed<'a>(
        &'a self,
        operation: &'a str,
        parameters: &'a Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, PluginError>>;

    fn unload_boxed(&self) -> BoxFuture<'_, Result<(), PluginError>>;
}

impl<T: LoadableUnit> LoadableUnitDyn for T {
    fn invoke_boxed<'a>(
        &'a self,
        operation: &'a str,
        parameters: &'a Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, PluginError>> {
        Box::pin(self.invoke(operation, parameters))
    }

    fn unload_boxed(&self) -> BoxFuture<'_, Result<(), PluginError>> {
        Box::pin(self.unload())
    }
}

// ---------------------------------------------------------------------------
// PluginLoader
// ---------------------------------------------------------------------------

/// Turns an installed package into a [`LoadableUnit`].
pub trait PluginLoader: Send + Sync + 'static {
    type Unit: LoadableUnit;

    fn load(
        &self,
        plugin: &InstalledPlugin,
    ) -> impl Future<Output = Result<Self::Unit, PluginError>> + Send;
}

pub trait PluginLoaderDyn: Send + Sync {
    fn load_boxed<'a>(
        &'a self,
        plugin: &'a InstalledPlugin,
    ) -> BoxFuture<'a, Result<Box<dyn LoadableUnitDyn>, PluginError>>;
}

impl<T: PluginLoader> PluginLoaderDyn for T {
    fn load_boxed<'a>(
        &'a self,
        plugin: &'a InstalledPlugin,
    ) -> BoxFuture<'a, Result<Box<dyn LoadableUnitDyn>, PluginError>> {
        Box::pin(async move {
            let unit = self.load(plugin).await?;
            Ok(Box::new(unit) as Box<dyn LoadableUnitDyn>)
        })
    }
}

pub struct BoxPluginLoader {
    inner: Box<dyn PluginLoaderDyn>,
}

impl BoxPluginLoader {
    pub fn new<T: PluginLoader>(loader: T) -> Self {
        Self {
            inner: Box::new(loader),
        }
    }

    pub async fn load(
        &self,
        plugin: &InstalledPlugin,
    ) -> Result<Box<dyn LoadableUnitDyn>, PluginError> {
        self.inner.load_boxed(plugin).await
    }
}

// ---------------------------------------------------------------------------
// PluginSource
// ---------------------------------------------------------------------------

/// Makes a plugin package available locally: fetch, verify, extract.
///
/// `ensure_installed` must be idempotent; a package already present with a
/// valid checksum is returned without re-downloading.
pub trait PluginSource: Send + Sync + 'static {
    fn ensure_installed(
        &self,
        plugin: &PluginRef,
    ) -> impl Future<Output = Result<InstalledPlugin, PluginError>> + Send;

    fn uninstall(&self, plugin: &PluginRef) -> impl Future<Output = Result<(), PluginError>> + Send;
}

pub trait PluginSourceDyn: Send + Sync {
    fn ensure_installed_boxed<'a>(
        &'a self,
        plugin: &'a PluginRef,
    ) -> BoxFuture<'a, Result<InstalledPlugin, PluginError>>;

    fn uninstall_boxed<'a>(&'a self, plugin: &'a PluginRef) -> BoxFuture<'a, Result<(), PluginError>>;
}

impl<T: PluginSource> PluginSourceDyn for T {
    fn ensure_installed_boxed<'a>(
        &'a self,
        plugin: &'a PluginRef,
    ) -> BoxFuture<'a, Result<InstalledPlugin, PluginError>> {
        Box::pin(self.ensure_installed(plugin))
    }

    fn uninstall_boxed<'a>(&'a self, plugin: &'a PluginRef) -> BoxFuture<'a, Result<(), PluginError>> {
        Box::pin(self.uninstall(plugin))
    }
}

pub struct BoxPluginSource {
    inner: Box<dyn PluginSourceDyn>,
}

impl BoxPluginSource {
    pub fn new<T: PluginSource>(source: T) -> Self {
        Self {
            inner: Box::new(source),
        }
    }

    pub async fn ensure_installed(&self, plugin: &PluginRef) -> Result<InstalledPlugin, PluginError> {
        self.inner.ensure_installed_boxed(plugin).await
    }

    pub async fn uninstall(&self, plugin: &PluginRef) -> Result<(), PluginError> {
        self.inner.uninstall_boxed(plugin).await
    }
}
