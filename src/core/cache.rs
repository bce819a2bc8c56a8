//! Hash-keyed response cache with explicit invalidation.
//!
//! Keys are always SHA-256 hex digests of a semantic string, never the
//! string itself. Storage is pluggable through [`CacheStore`]; a [`Cache`]
//! without a store silently does nothing.
//!
//! Deletes win over older writes: every delete leaves a tombstone stamped
//! with a generation number, and [`Cache::set_if_fresh`] drops a write whose
//! ticket predates a tombstone for the same key. Tombstones are kept only
//! while a ticket older than them is outstanding.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// Default capacity of the in-memory store
pub const DEFAULT_CAPACITY: usize = 100;

/// Hash a semantic string into a cache key (64 lowercase hex chars)
pub fn hash_key(semantic: &str) -> String {
    hex::encode(Sha256::digest(semantic.as_bytes()))
}

/// Cache key for a prompt rendered within a root prompt
pub fn prompt_cache_key(root_prompt: &str, prompt: &str) -> String {
    hash_key(&format!("{}{}", root_prompt, prompt))
}

/// Backing storage for the cache. Keys arrive pre-hashed.
///
/// Each operation must be atomic on its own; no cross-operation
/// transaction is expected.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Human-readable store name
    fn name(&self) -> &str;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Remove `key`; absent keys are not an error
    async fn delete(&self, key: &str) -> Result<()>;
}

// ============================================================================
// Memory store
// ============================================================================

#[derive(Debug)]
struct Lru {
    capacity: usize,
    map: HashMap<String, String>,
    order: VecDeque<String>,
}

impl Lru {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }

    fn put(&mut self, key: &str, value: &str) {
        if self.map.insert(key.to_string(), value.to_string()).is_some() {
            self.touch(key);
        } else {
            self.order.push_back(key.to_string());
        }

        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
                debug!(key = %evicted, "Evicted cache entry");
            }
        }
    }

    fn remove(&mut self, key: &str) {
        if self.map.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }
}

/// Size-bounded in-memory store with least-recently-used eviction
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Lru>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Lru {
                capacity: capacity.max(1),
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Lru> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock().put(key, value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut lru = self.lock();
        let value = lru.map.get(key).cloned();
        if value.is_some() {
            lru.touch(key);
        }
        Ok(value)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.lock().map.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}

// ============================================================================
// File store
// ============================================================================

/// Directory-backed store: one file per key, surviving process restarts.
///
/// Writes go to a temporary file that is renamed into place, so readers
/// never observe a partial value. Keys that are not plain alphanumeric
/// strings are treated as absent, since they would not be valid digests.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> Option<PathBuf> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(self.dir.join(key))
    }
}

#[async_trait]
impl CacheStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self
            .entry_path(key)
            .with_context(|| format!("Invalid cache key: {:?}", key))?;
        let tmp = self.dir.join(format!(".{}.{}.tmp", key, Uuid::new_v4()));

        fs::write(&tmp, value)
            .await
            .with_context(|| format!("Failed to write cache entry: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move cache entry into place: {}", path.display()))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let Some(path) = self.entry_path(key) else {
            return Ok(None);
        };

        match fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read cache entry: {}", path.display())),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.entry_path(key) {
            Some(path) => Ok(fs::try_exists(&path).await.unwrap_or(false)),
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let Some(path) = self.entry_path(key) else {
            return Ok(());
        };

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete cache entry: {}", path.display())),
        }
    }
}

// ============================================================================
// Cache facade
// ============================================================================

/// Generation snapshot taken before computing a value to be cached.
///
/// The ticket is outstanding until dropped.
#[derive(Debug)]
pub struct CacheTicket {
    generation: u64,
    invalidations: Arc<Mutex<Invalidations>>,
}

impl CacheTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for CacheTicket {
    fn drop(&mut self) {
        lock(&self.invalidations).release(self.generation);
    }
}

/// Delete generations and outstanding tickets
#[derive(Debug, Default)]
struct Invalidations {
    generation: u64,
    /// Generation of the latest delete per key
    tombstones: HashMap<String, u64>,
    /// Outstanding ticket count per generation
    live: BTreeMap<u64, usize>,
}

impl Invalidations {
    fn issue(&mut self) -> u64 {
        *self.live.entry(self.generation).or_default() += 1;
        self.generation
    }

    fn release(&mut self, generation: u64) {
        if let Some(count) = self.live.get_mut(&generation) {
            *count -= 1;
            if *count == 0 {
                self.live.remove(&generation);
                self.prune();
            }
        }
    }

    fn invalidate(&mut self, key: &str) {
        self.generation += 1;
        self.tombstones.insert(key.to_string(), self.generation);
        self.prune();
    }

    /// A tombstone only blocks tickets older than itself
    fn prune(&mut self) {
        match self.live.keys().next().copied() {
            Some(oldest) => self.tombstones.retain(|_, generation| *generation > oldest),
            None => self.tombstones.clear(),
        }
    }
}

fn lock(invalidations: &Mutex<Invalidations>) -> MutexGuard<'_, Invalidations> {
    invalidations.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-wide response cache.
///
/// Shared as `Arc<Cache>` between concurrent request chains.
pub struct Cache {
    store: Option<Arc<dyn CacheStore>>,
    invalidations: Arc<Mutex<Invalidations>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl Cache {
    /// Cache backed by `store`
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_store(Some(store))
    }

    /// Cache with no store: every operation is a silent no-op
    pub fn disabled() -> Self {
        Self::with_store(None)
    }

    /// In-memory LRU cache
    pub fn memory(capacity: usize) -> Self {
        Self::new(Arc::new(MemoryStore::new(capacity)))
    }

    fn with_store(store: Option<Arc<dyn CacheStore>>) -> Self {
        Self {
            store,
            invalidations: Arc::new(Mutex::new(Invalidations::default())),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Name of the backing store ("none" when disabled)
    pub fn backend_name(&self) -> &str {
        self.store.as_ref().map_or("none", |s| s.name())
    }

    /// Snapshot the current generation
    pub fn ticket(&self) -> CacheTicket {
        let generation = lock(&self.invalidations).issue();
        CacheTicket {
            generation,
            invalidations: Arc::clone(&self.invalidations),
        }
    }

    /// Unconditional write
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;
        store.set(key, value).await
    }

    /// Write unless `key` was invalidated after `ticket` was taken.
    ///
    /// Returns whether the value was stored.
    pub async fn set_if_fresh(&self, key: &str, value: &str, ticket: CacheTicket) -> Result<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let _guard = self.write_lock.lock().await;

        let invalidated_at = lock(&self.invalidations).tombstones.get(key).copied();
        if let Some(generation) = invalidated_at {
            if generation > ticket.generation {
                debug!(%key, generation, ticket = ticket.generation, "Dropping write older than invalidation");
                return Ok(false);
            }
        }

        store.set(key, value).await?;
        Ok(true)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        match &self.store {
            Some(store) => store.get(key).await,
            None => Ok(None),
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        match &self.store {
            Some(store) => store.exists(key).await,
            None => Ok(false),
        }
    }

    /// Remove `key` and invalidate any in-flight write for it
    pub async fn delete(&self, key: &str) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;

        lock(&self.invalidations).invalidate(key);
        store.delete(key).await
    }

    #[cfg(test)]
    fn tombstone_count(&self) -> usize {
        lock(&self.invalidations).tombstones.len()
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("backend", &self.backend_name())
            .field("generation", &lock(&self.invalidations).generation)
            .finish()
    }
}
