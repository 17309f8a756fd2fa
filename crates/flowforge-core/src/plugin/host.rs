//! `PluginHost`: the resolve pipeline in front of the cache.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use flowforge_types::plugin::PluginRef;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::cache::{CacheIndex, CacheItem, PluginCache, PluginLease, generate_key};
use super::loader::{BoxPluginLoader, BoxPluginSource, InstalledPlugin};
use super::specification::check_parameters;
use super::PluginError;

/// Resolves plugin references to leased, loaded units.
///
/// One host is constructed per process and shared by reference; it owns the
/// cache and therefore the load/unload lifecycle of every unit.
pub struct PluginHost {
    source: BoxPluginSource,
    loader: BoxPluginLoader,
    cache: Arc<PluginCache>,
    ttl: Duration,
    /// Serialises loads of the same key so concurrent misses load once.
    loading: DashMap<String, Arc<Mutex<()>>>,
    /// Serialises source work per package. Cache keys include the user and
    /// parameters, so different keys can share one install directory.
    installing: DashMap<String, Arc<Mutex<()>>>,
}

impl PluginHost {
    pub fn new(source: BoxPluginSource, loader: BoxPluginLoader, ttl: Duration) -> Self {
        Self {
            source,
            loader,
            cache: Arc::new(PluginCache::new()),
            ttl,
            loading: DashMap::new(),
            installing: DashMap::new(),
        }
    }

    pub fn cache(&self) -> &Arc<PluginCache> {
        &self.cache
    }

    /// Lease a unit for `plugin`, loading it on a cache miss.
    ///
    /// On a miss the package is installed (idempotently), `parameters` are
    /// checked against the manifest specifications, and the unit is loaded
    /// and cached for the configured TTL. All errors are fatal for the
    /// calling task.
    pub async fn resolve(
        &self,
        user_id: &str,
        plugin: &PluginRef,
        parameters: &Map<String, Value>,
    ) -> Result<PluginLease, PluginError> {
        let key = generate_key(user_id, &plugin.plugin_type(), &plugin.version, parameters);

        if let Some(lease) = self.cache.get(&key).await {
            tracing::debug!(plugin = %plugin, user_id, "plugin cache hit");
            return Ok(lease);
        }

        let lock = self
            .loading
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(lease) = self.cache.get(&key).await {
            return Ok(lease);
        }

        tracing::debug!(plugin = %plugin, user_id, "plugin cache miss, loading");
        let result = self.load(user_id, plugin, parameters, &key).await;
        drop(_guard);
        self.loading.remove_if(&key, |_, l| Arc::strong_count(l) <= 2);
        result
    }

    async fn load(
        &self,
        user_id: &str,
        plugin: &PluginRef,
        parameters: &Map<String, Value>,
        key: &str,
    ) -> Result<PluginLease, PluginError> {
        let installed = self.install(plugin).await?;
        check_parameters(&installed.manifest.specifications, parameters)?;
        let unit = self.loader.load(&installed).await?;

        tracing::info!(plugin = %plugin, path = %installed.path.display(), "plugin loaded");

        self.cache
            .set(
                key,
                CacheIndex::new(user_id, plugin.plugin_type(), plugin.version.clone()),
                CacheItem {
                    label: plugin.to_string(),
                    unit,
                    operations: installed.manifest.operations.clone(),
                },
                self.ttl,
            )
            .await
    }

    async fn install(&self, plugin: &PluginRef) -> Result<InstalledPlugin, PluginError> {
        self.with_package_lock(plugin, self.source.ensure_installed(plugin))
            .await
    }

    async fn with_package_lock<T>(&self, plugin: &PluginRef, work: impl Future<Output = T>) -> T {
        let id = plugin.to_string();
        let lock = self
            .installing
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock().await;
        let result = work.await;
        drop(guard);
        self.installing.remove_if(&id, |_, l| Arc::strong_count(l) <= 2);
        result
    }

    /// Drop every cached unit of `plugin` for `user_id`.
    pub async fn invalidate(&self, user_id: &str, plugin: &PluginRef) -> usize {
        self.cache
            .remove_by_index(&CacheIndex::new(
                user_id,
                plugin.plugin_type(),
                plugin.version.clone(),
            ))
            .await
    }

    /// Invalidate the user's cached units, then remove the package.
    pub async fn uninstall(&self, user_id: &str, plugin: &PluginRef) -> Result<(), PluginError> {
        let removed = self.invalidate(user_id, plugin).await;
        tracing::info!(plugin = %plugin, user_id, evicted = removed, "uninstalling plugin");
        self.with_package_lock(plugin, self.source.uninstall(plugin))
            .await
    }

    /// Purge expired cache entries every `interval` until `cancel` fires.
    pub fn spawn_purge(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let host = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = host.cache.purge_expired().await;
                        if purged > 0 {
                            tracing::debug!(purged, "expired plugin units evicted");
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeLoader, FakeSource, plugin_ref};
    use serde_json::json;

    fn host(source: FakeSource, loader: FakeLoader) -> PluginHost {
        PluginHost::new(
            BoxPluginSource::new(source),
            BoxPluginLoader::new(loader),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn second_resolve_hits_the_cache() {
        let source = FakeSource::default();
        let loader = FakeLoader::default();
        let host = host(source.clone(), loader.clone());
        let params = Map::new();

        drop(host.resolve("u", &plugin_ref("echo"), &params).await.unwrap());
        drop(host.resolve("u", &plugin_ref("echo"), &params).await.unwrap());

        assert_eq!(source.installs(), 1);
        assert_eq!(loader.loads(), 1);
    }

    #[tokio::test]
    async fn different_users_get_different_units() {
        let loader = FakeLoader::default();
        let host = host(FakeSource::default(), loader.clone());
        let params = Map::new();

        drop(host.resolve("alice", &plugin_ref("echo"), &params).await.unwrap());
        drop(host.resolve("bob", &plugin_ref("echo"), &params).await.unwrap());
        assert_eq!(loader.loads(), 2);

        assert_eq!(host.invalidate("alice", &plugin_ref("echo")).await, 1);
        assert_eq!(host.cache().len(), 1);
    }

    #[tokio::test]
    async fn specification_mismatch_is_fatal_and_not_cached() {
        let source = FakeSource::with_required("to");
        let loader = FakeLoader::default();
        let host = host(source, loader.clone());

        let err = host
            .resolve("u", &plugin_ref("mail"), &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::SpecificationMismatch(_)));
        assert_eq!(loader.loads(), 0);
        assert!(host.cache().is_empty());

        let params = json!({"to": "ops@example.com"});
        host.resolve("u", &plugin_ref("mail"), params.as_object().unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn source_errors_surface_unchanged() {
        let host = host(FakeSource::failing(), FakeLoader::default());
        let err = host
            .resolve("u", &plugin_ref("echo"), &Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Fetch { .. }));
    }

    #[tokio::test]
    async fn uninstall_evicts_and_removes_package() {
        let source = FakeSource::default();
        let host = host(source.clone(), FakeLoader::default());
        drop(host.resolve("u", &plugin_ref("echo"), &Map::new()).await.unwrap());

        host.uninstall("u", &plugin_ref("echo")).await.unwrap();
        assert!(host.cache().is_empty());
        assert_eq!(source.uninstalls(), 1);
    }

    #[tokio::test]
    async fn concurrent_users_never_install_the_same_package_at_once() {
        let source = FakeSource::slow(Duration::from_millis(50));
        let loader = FakeLoader::default();
        let host = host(source.clone(), loader.clone());
        let plugin = plugin_ref("echo");
        let tuned = json!({"retries": 3});
        let empty = Map::new();

        let (alice, bob, tuned) = tokio::join!(
            host.resolve("alice", &plugin, &empty),
            host.resolve("bob", &plugin, &empty),
            host.resolve("alice", &plugin, tuned.as_object().unwrap()),
        );
        assert!(alice.is_ok() && bob.is_ok() && tuned.is_ok());

        assert_eq!(source.installs(), 3);
        assert_eq!(source.max_concurrent_installs(), 1);
        assert_eq!(loader.loads(), 3);
    }
}
