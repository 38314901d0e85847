//! Memoization layer for category decisions, embeddings and leftover snapshots.
//!
//! Entries are keyed by a SHA-256 over the JSON form of the normalized request,
//! never expire, and are cleared when the organizer (re)initializes. Concurrent
//! misses on the same key may both compute and both write; last write wins.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheNamespace {
    Category,
    Embedding,
    LeftoverSnapshot,
}

impl CacheNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheNamespace::Category => "category",
            CacheNamespace::Embedding => "embedding",
            CacheNamespace::LeftoverSnapshot => "leftover_snapshot",
        }
    }
}

type NamespaceMap = HashMap<CacheNamespace, HashMap<String, Value>>;

/// Injected key-value store shared by every component of a pass
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, namespace: CacheNamespace, key: &str) -> Option<Value>;

    async fn set(&self, namespace: CacheNamespace, key: &str, value: Value) -> Result<()>;

    /// Drop every entry in every namespace
    async fn clear(&self) -> Result<()>;
}

/// Deterministic key for a request tuple
pub fn cache_key<T: Serialize + ?Sized>(request: &T) -> Result<String> {
    let bytes = serde_json::to_vec(request)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Typed read; entries that no longer deserialize are treated as misses
pub async fn get_typed<T: DeserializeOwned>(
    store: &dyn CacheStore,
    namespace: CacheNamespace,
    key: &str,
) -> Option<T> {
    let value = store.get(namespace, key).await?;
    serde_json::from_value(value).ok()
}

/// Typed write; persistence failures are logged, not propagated
pub async fn put_typed<T: Serialize>(
    store: &dyn CacheStore,
    namespace: CacheNamespace,
    key: &str,
    value: &T,
) {
    let value = match serde_json::to_value(value) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("Cache value for {} not serializable: {}", namespace.as_str(), e);
            return;
        }
    };
    if let Err(e) = store.set(namespace, key, value).await {
        tracing::warn!("Cache write to {} failed: {}", namespace.as_str(), e);
    }
}

/// Process-local cache
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<NamespaceMap>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_entries(entries: NamespaceMap) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Number of entries in a namespace
    pub async fn len(&self, namespace: CacheNamespace) -> usize {
        self.entries
            .read()
            .await
            .get(&namespace)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    async fn snapshot(&self) -> NamespaceMap {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, namespace: CacheNamespace, key: &str) -> Option<Value> {
        self.entries.read().await.get(&namespace)?.get(key).cloned()
    }

    async fn set(&self, namespace: CacheNamespace, key: &str, value: Value) -> Result<()> {
        self.entries
            .write()
            .await
            .entry(namespace)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}

/// Memory cache mirrored to a JSON file after every write
pub struct FileCache {
    path: PathBuf,
    inner: MemoryCache,
    persist_lock: Mutex<()>,
}

impl FileCache {
    /// Open (or create) a cache file. An unreadable file starts an empty cache.
    pub async fn open(path: &Path) -> Result<Self> {
        let entries = match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str::<NamespaceMap>(&content).unwrap_or_else(|e| {
                tracing::warn!("Discarding unreadable cache {}: {}", path.display(), e);
                NamespaceMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => NamespaceMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            inner: MemoryCache::from_entries(entries),
            persist_lock: Mutex::new(()),
        })
    }

    /// Default cache file: `<cache dir>/tabgrove/cache.json`
    pub fn default_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tabgrove")
            .join("cache.json")
    }

    pub async fn len(&self, namespace: CacheNamespace) -> usize {
        self.inner.len(namespace).await
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let content = serde_json::to_string(&self.inner.snapshot().await)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // The cache file is only ever replaced whole
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FileCache {
    async fn get(&self, namespace: CacheNamespace, key: &str) -> Option<Value> {
        self.inner.get(namespace, key).await
    }

    async fn set(&self, namespace: CacheNamespace, key: &str, value: Value) -> Result<()> {
        self.inner.set(namespace, key, value).await?;
        self.persist().await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await?;
        self.persist().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_is_deterministic() {
        let a = cache_key(&("https://a.com", "title", "", vec!["news", "sports"])).unwrap();
        let b = cache_key(&("https://a.com", "title", "", vec!["news", "sports"])).unwrap();
        let c = cache_key(&("https://a.com", "title", "", vec!["sports", "news"])).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_memory_cache_namespaces_are_isolated() {
        let cache = MemoryCache::new();
        cache.set(CacheNamespace::Category, "k", json!("news")).await.unwrap();

        assert_eq!(cache.get(CacheNamespace::Category, "k").await, Some(json!("news")));
        assert_eq!(cache.get(CacheNamespace::Embedding, "k").await, None);
        assert_eq!(cache.len(CacheNamespace::Category).await, 1);
    }

    #[tokio::test]
    async fn test_memory_cache_clear() {
        let cache = MemoryCache::new();
        cache.set(CacheNamespace::Embedding, "k", json!([[1.0, 0.0]])).await.unwrap();
        cache.clear().await.unwrap();
        assert_eq!(cache.len(CacheNamespace::Embedding).await, 0);
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        let cache = MemoryCache::new();
        put_typed(&cache, CacheNamespace::Embedding, "v", &vec![vec![0.5f32, 0.25]]).await;
        let back: Option<Vec<Vec<f32>>> = get_typed(&cache, CacheNamespace::Embedding, "v").await;
        assert_eq!(back, Some(vec![vec![0.5, 0.25]]));

        // Wrong shape reads as a miss
        let wrong: Option<String> = get_typed(&cache, CacheNamespace::Embedding, "v").await;
        assert!(wrong.is_none());
    }

    #[tokio::test]
    async fn test_file_cache_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache = FileCache::open(&path).await.unwrap();
        cache.set(CacheNamespace::Category, "k", json!("none")).await.unwrap();
        drop(cache);

        let reopened = FileCache::open(&path).await.unwrap();
        assert_eq!(reopened.get(CacheNamespace::Category, "k").await, Some(json!("none")));

        reopened.clear().await.unwrap();
        let cleared = FileCache::open(&path).await.unwrap();
        assert_eq!(cleared.len(CacheNamespace::Category).await, 0);
    }

    #[tokio::test]
    async fn test_file_cache_ignores_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "garbage").unwrap();

        let cache = FileCache::open(&path).await.unwrap();
        assert_eq!(cache.len(CacheNamespace::Category).await, 0);
    }
}
