//! Cache of loaded plugin units.
//!
//! Entries live in a concurrent map and are read without taking the index
//! lock. The secondary index `{user, plugin type, version} -> keys` is
//! mutated under a single async mutex so bulk invalidation sees a consistent
//! key set.
//!
//! Every entry is reference-tracked: a [`PluginLease`] counts as one
//! in-flight use. Eviction (TTL, replacement, `remove_*`) retires the unit and
//! its `unload` runs once the last lease is dropped, never while an
//! invocation is still running.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::PluginError;
use super::checksum::sha256_hex;
use super::loader::LoadableUnitDyn;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Groups every cache key belonging to one installed plugin version for a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheIndex {
    pub user_id: String,
    pub plugin_type: String,
    pub plugin_version: String,
}

impl CacheIndex {
    pub fn new(
        user_id: impl Into<String>,
        plugin_type: impl Into<String>,
        plugin_version: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            plugin_type: plugin_type.into(),
            plugin_version: plugin_version.into(),
        }
    }
}

/// Deterministic cache key: SHA-256 over the index fields and the canonical
/// (key-sorted) JSON form of `specifications`.
pub fn generate_key(
    user_id: &str,
    plugin_type: &str,
    plugin_version: &str,
    specifications: &Map<String, Value>,
) -> String {
    let mut material = String::new();
    for part in [user_id, plugin_type, plugin_version] {
        material.push_str(part);
        material.push('\u{1f}');
    }
    write_canonical(&Value::Object(specifications.clone()), &mut material);
    sha256_hex(material.as_bytes())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Reference-tracked unit
// ---------------------------------------------------------------------------

struct CachedUnit {
    label: String,
    unit: Box<dyn LoadableUnitDyn>,
    operations: Vec<String>,
    in_flight: AtomicUsize,
    retired: AtomicBool,
    unloaded: AtomicBool,
    idle: Notify,
}

impl CachedUnit {
    /// Take a lease, or `None` if the unit has already been retired.
    fn lease(self: &Arc<Self>) -> Option<PluginLease> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.retired.load(Ordering::SeqCst) {
            self.release();
            return None;
        }
        Some(PluginLease {
            unit: Arc::clone(self),
        })
    }

    fn release(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Mark retired and unload in the background once idle.
    fn retire(self: Arc<Self>) {
        if self.retired.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(async move {
            self.unload_when_idle().await;
        });
    }

    async fn unload_when_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            tracing::debug!(plugin = %self.label, "deferring unload until in-flight calls finish");
            notified.await;
        }

        if self.unloaded.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.unit.unload_boxed().await {
            Ok(()) => tracing::debug!(plugin = %self.label, "plugin unit unloaded"),
            Err(e) => tracing::warn!(plugin = %self.label, error = %e, "plugin unload failed"),
        }
    }
}

/// An in-flight reference to a cached unit.
pub struct PluginLease {
    unit: Arc<CachedUnit>,
}

impl PluginLease {
    pub async fn invoke(
        &self,
        operation: &str,
        parameters: &Map<String, Value>,
    ) -> Result<Value, PluginError> {
        if !self.supports(operation) {
            return Err(PluginError::UnsupportedOperation(operation.to_string()));
        }
        self.unit.unit.invoke_boxed(operation, parameters).await
    }

    /// Whether the manifest lists `operation` (an empty list allows any).
    pub fn supports(&self, operation: &str) -> bool {
        self.unit.operations.is_empty() || self.unit.operations.iter().any(|o| o == operation)
    }

    pub fn label(&self) -> &str {
        &self.unit.label
    }
}

impl Drop for PluginLease {
    fn drop(&mut self) {
        self.unit.release();
    }
}

impl std::fmt::Debug for PluginLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLease")
            .field("plugin", &self.unit.label)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct CacheEntry {
    unit: Arc<CachedUnit>,
    index: CacheIndex,
    expires_at: Instant,
}

/// What to store with [`PluginCache::set`].
pub struct CacheItem {
    pub label: String,
    pub unit: Box<dyn LoadableUnitDyn>,
    /// Operations the unit answers; empty means any.
    pub operations: Vec<String>,
}

#[derive(Default)]
pub struct PluginCache {
    entries: DashMap<String, CacheEntry>,
    index: Mutex<HashMap<CacheIndex, HashSet<String>>>,
}

impl PluginCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lease the unit under `key` if present and not expired.
    pub async fn get(&self, key: &str) -> Option<PluginLease> {
        {
            let entry = self.entries.get(key)?;
            if entry.expires_at > Instant::now() {
                return entry.unit.lease();
            }
        }
        self.remove_expired(key, Instant::now()).await;
        None
    }

    /// Store a freshly loaded unit and return a lease on it. A unit already
    /// stored under `key` is evicted.
    pub async fn set(
        &self,
        key: &str,
        index: CacheIndex,
        item: CacheItem,
        ttl: Duration,
    ) -> Result<PluginLease, PluginError> {
        let unit = Arc::new(CachedUnit {
            label: item.label,
            unit: item.unit,
            operations: item.operations,
            in_flight: AtomicUsize::new(0),
            retired: AtomicBool::new(false),
            unloaded: AtomicBool::new(false),
            idle: Notify::new(),
        });
        let lease = unit
            .lease()
            .ok_or_else(|| PluginError::Load("unit retired before first use".to_string()))?;

        let mut idx = self.index.lock().await;
        let previous = self.entries.insert(
            key.to_string(),
            CacheEntry {
                unit,
                index: index.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        if let Some(previous) = previous {
            if previous.index != index {
                remove_from_index(&mut idx, &previous.index, key);
            }
            previous.unit.retire();
        }
        idx.entry(index).or_default().insert(key.to_string());

        Ok(lease)
    }

    pub async fn remove_by_key(&self, key: &str) -> bool {
        let mut idx = self.index.lock().await;
        match self.entries.remove(key) {
            Some((_, entry)) => {
                remove_from_index(&mut idx, &entry.index, key);
                entry.unit.retire();
                true
            }
            None => false,
        }
    }

    /// Evict every key stored under `index`. Returns how many were removed.
    pub async fn remove_by_index(&self, index: &CacheIndex) -> usize {
        let mut idx = self.index.lock().await;
        let Some(keys) = idx.remove(index) else {
            return 0;
        };

        let mut removed = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                entry.unit.retire();
                removed += 1;
            }
        }
        removed
    }

    /// Evict expired entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.expires_at <= now)
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            if self.remove_expired(&key, now).await {
                removed += 1;
            }
        }
        removed
    }

    /// Remove `key` only if it is still expired at `now`; a replacement
    /// stored concurrently survives.
    async fn remove_expired(&self, key: &str, now: Instant) -> bool {
        let mut idx = self.index.lock().await;
        match self.entries.remove_if(key, |_, e| e.expires_at <= now) {
            Some((_, entry)) => {
                remove_from_index(&mut idx, &entry.index, key);
                entry.unit.retire();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub async fn keys_for(&self, index: &CacheIndex) -> Vec<String> {
        self.index
            .lock()
            .await
            .get(index)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn remove_from_index(idx: &mut HashMap<CacheIndex, HashSet<String>>, index: &CacheIndex, key: &str) {
    if let Some(keys) = idx.get_mut(index) {
        keys.remove(key);
        if keys.is_empty() {
            idx.remove(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::LoadableUnit;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    #[derive(Clone, Default)]
    struct CountingUnit {
        unloads: Arc<AtomicU32>,
        gate: Arc<Notify>,
        block: bool,
    }

    impl LoadableUnit for CountingUnit {
        async fn invoke(&self, operation: &str, _p: &Map<String, Value>) -> Result<Value, PluginError> {
            if self.block {
                self.gate.notified().await;
            }
            Ok(json!({ "op": operation }))
        }

        async fn unload(&self) -> Result<(), PluginError> {
            self.unloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn item(unit: CountingUnit) -> CacheItem {
        CacheItem {
            label: "test/unit@1.0.0".into(),
            unit: Box::new(unit),
            operations: vec![],
        }
    }

    fn index(user: &str) -> CacheIndex {
        CacheIndex::new(user, "core/http", "1.0.0")
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn key_is_deterministic_and_order_insensitive() {
        let a = json!({"url": "x", "opts": {"b": 1, "a": [1, 2]}});
        let b = json!({"opts": {"a": [1, 2], "b": 1}, "url": "x"});
        let ka = generate_key("u", "core/http", "1.0.0", a.as_object().unwrap());
        let kb = generate_key("u", "core/http", "1.0.0", b.as_object().unwrap());
        assert_eq!(ka, kb);
        assert_eq!(ka.len(), 64);
    }

    #[test]
    fn key_changes_with_any_input() {
        let specs = json!({"url": "x"});
        let specs = specs.as_object().unwrap();
        let base = generate_key("u", "core/http", "1.0.0", specs);
        let other_specs = json!({"url": "y"});
        assert_ne!(base, generate_key("u", "core/http", "1.0.0", other_specs.as_object().unwrap()));
        assert_ne!(base, generate_key("v", "core/http", "1.0.0", specs));
        assert_ne!(base, generate_key("u", "core/http", "1.0.1", specs));
        assert_ne!(base, generate_key("u", "core/mail", "1.0.0", specs));
    }

    #[tokio::test]
    async fn get_returns_stored_unit() {
        let cache = PluginCache::new();
        let lease = cache
            .set("k", index("u"), item(CountingUnit::default()), Duration::from_secs(60))
            .await
            .unwrap();
        drop(lease);

        let lease = cache.get("k").await.expect("hit");
        let out = lease.invoke("execute", &Map::new()).await.unwrap();
        assert_eq!(out, json!({"op": "execute"}));
        assert!(cache.get("missing").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_evicts_and_unloads() {
        let unit = CountingUnit::default();
        let cache = PluginCache::new();
        drop(cache.set("k", index("u"), item(unit.clone()), Duration::from_secs(5)).await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get("k").await.is_none());
        assert!(cache.is_empty());
        settle().await;
        assert_eq!(unit.unloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remove_by_index_only_touches_that_index() {
        let cache = PluginCache::new();
        let ttl = Duration::from_secs(60);
        drop(cache.set("a1", index("alice"), item(CountingUnit::default()), ttl).await.unwrap());
        drop(cache.set("a2", index("alice"), item(CountingUnit::default()), ttl).await.unwrap());
        drop(cache.set("b1", index("bob"), item(CountingUnit::default()), ttl).await.unwrap());

        assert_eq!(cache.keys_for(&index("alice")).await.len(), 2);
        assert_eq!(cache.remove_by_index(&index("alice")).await, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("b1").await.is_some());
        assert_eq!(cache.remove_by_index(&index("alice")).await, 0);
    }

    #[tokio::test]
    async fn eviction_waits_for_in_flight_invocation() {
        let unit = CountingUnit {
            block: true,
            ..CountingUnit::default()
        };
        let cache = Arc::new(PluginCache::new());
        let lease = cache
            .set("k", index("u"), item(unit.clone()), Duration::from_secs(60))
            .await
            .unwrap();

        let call = tokio::spawn(async move { lease.invoke("execute", &Map::new()).await });
        settle().await;

        assert!(cache.remove_by_key("k").await);
        settle().await;
        assert_eq!(unit.unloads.load(Ordering::SeqCst), 0, "unloaded during invocation");

        unit.gate.notify_waiters();
        call.await.unwrap().unwrap();
        settle().await;
        assert_eq!(unit.unloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn replacing_a_key_retires_the_old_unit_once() {
        let old = CountingUnit::default();
        let cache = PluginCache::new();
        let ttl = Duration::from_secs(60);
        drop(cache.set("k", index("u"), item(old.clone()), ttl).await.unwrap());
        drop(cache.set("k", index("u"), item(CountingUnit::default()), ttl).await.unwrap());
        settle().await;

        assert_eq!(old.unloads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.remove_by_key("k").await);
        assert!(!cache.remove_by_key("k").await);
    }

    #[tokio::test]
    async fn unsupported_operation_is_rejected_before_invoking() {
        let cache = PluginCache::new();
        let lease = cache
            .set(
                "k",
                index("u"),
                CacheItem {
                    label: "x".into(),
                    unit: Box::new(CountingUnit::default()),
                    operations: vec!["send".into()],
                },
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert!(lease.supports("send"));
        assert!(matches!(
            lease.invoke("execute", &Map::new()).await,
            Err(PluginError::UnsupportedOperation(op)) if op == "execute"
        ));
    }
}
