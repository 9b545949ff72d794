use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use locator_core_types::{ContextId, Fingerprint};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::durable::{DurableRecord, DurableTier, FsDurableTier, NullDurableTier};
use crate::errors::CacheError;
use crate::memory::{CacheEntry, ContextTags, MemoryTier, Vector};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    /// Directory for the durable tier; memory-only when unset.
    pub durable_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            durable_dir: None,
        }
    }
}

/// Where a lookup was answered from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    MemoryHit,
    DurableHit,
    Miss,
}

impl CacheOutcome {
    pub fn is_hit(&self) -> bool {
        !matches!(self, CacheOutcome::Miss)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub durable_hits: u64,
    pub durable_errors: u64,
    pub entries: usize,
    pub degraded: bool,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    durable_hits: AtomicU64,
    durable_errors: AtomicU64,
}

/// Fingerprint to vector map: bounded LRU in front of a durable tier.
///
/// Durable failures never reach the caller. The first I/O failure switches
/// the cache to memory-only operation for the rest of its life.
///
/// Background durable writes carry the clear generation they were issued
/// in; a write that finds the generation moved on is dropped, so a clear
/// cannot be undone by a write that was still in flight.
pub struct EmbeddingCache {
    memory: MemoryTier,
    durable: Arc<dyn DurableTier>,
    counters: Counters,
    degraded: Arc<AtomicBool>,
    generation: Arc<RwLock<u64>>,
}

impl EmbeddingCache {
    pub fn new(capacity: usize, durable: Arc<dyn DurableTier>) -> Self {
        Self {
            memory: MemoryTier::new(capacity),
            durable,
            counters: Counters::default(),
            degraded: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(RwLock::new(0)),
        }
    }

    pub fn memory_only(capacity: usize) -> Self {
        Self::new(capacity, Arc::new(NullDurableTier))
    }

    /// Builds the cache described by `config`. An unusable durable directory
    /// degrades to memory-only instead of failing.
    pub fn from_config(config: &CacheConfig) -> Self {
        match &config.durable_dir {
            None => Self::memory_only(config.capacity),
            Some(dir) => match FsDurableTier::open(dir) {
                Ok(tier) => Self::new(config.capacity, Arc::new(tier)),
                Err(err) => {
                    let cache = Self::memory_only(config.capacity);
                    cache.durable_failure(&err);
                    cache
                }
            },
        }
    }

    pub fn capacity(&self) -> usize {
        self.memory.capacity()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Vector> {
        self.lookup(fingerprint, None).map(|(vector, _)| vector)
    }

    pub fn put(&self, fingerprint: Fingerprint, vector: Vec<f32>) -> Vector {
        self.put_scoped(fingerprint, None, vector)
    }

    /// Writes both tiers, adding `context` to the contexts that hold the
    /// vector. The durable write does not block the caller when a tokio
    /// runtime is available.
    pub fn put_scoped(
        &self,
        fingerprint: Fingerprint,
        context: Option<ContextId>,
        vector: Vec<f32>,
    ) -> Vector {
        let vector: Vector = Arc::from(vector);
        self.insert_memory(
            fingerprint.clone(),
            ContextTags::of(context.as_ref()),
            Arc::clone(&vector),
        );
        if self.durable_enabled() {
            let tags = self
                .memory
                .tags(&fingerprint)
                .unwrap_or_else(|| ContextTags::of(context.as_ref()));
            self.spawn_store(DurableRecord::new(fingerprint, tags, &vector));
        }
        vector
    }

    /// Returns the cached vector or computes, stores and returns a fresh one.
    pub fn get_or_embed<F>(
        &self,
        fingerprint: &Fingerprint,
        context: Option<&ContextId>,
        embed: F,
    ) -> Result<(Vector, CacheOutcome), CacheError>
    where
        F: FnOnce() -> Result<Vec<f32>, CacheError>,
    {
        if let Some(found) = self.lookup(fingerprint, context) {
            return Ok(found);
        }
        let vector = embed()?;
        let vector = self.put_scoped(fingerprint.clone(), context.cloned(), vector);
        Ok((vector, CacheOutcome::Miss))
    }

    pub fn clear(&self) {
        let mut generation = self.generation.write();
        *generation += 1;
        self.memory.clear();
        if self.durable_enabled() {
            if let Err(err) = self.durable.clear() {
                self.durable_failure(&err);
            }
        }
        debug!(target: "embedding.cache", generation = *generation, "cache.cleared");
    }

    /// Releases `context` from both tiers. Vectors another context still
    /// holds stay cached. Durable writes still in flight are dropped.
    pub fn clear_context(&self, context: &ContextId) -> usize {
        let mut generation = self.generation.write();
        *generation += 1;
        let mut removed = self.memory.remove_context(context);
        if self.durable_enabled() {
            match self.durable.clear_context(context) {
                Ok(count) => removed += count,
                Err(err) => self.durable_failure(&err),
            }
        }
        debug!(
            target: "embedding.cache",
            context = %context,
            removed,
            generation = *generation,
            "cache.context_cleared"
        );
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            durable_hits: self.counters.durable_hits.load(Ordering::Relaxed),
            durable_errors: self.counters.durable_errors.load(Ordering::Relaxed),
            entries: self.memory.len(),
            degraded: self.is_degraded(),
        }
    }

    /// Memory first, then durable. A hit under a context the vector was not
    /// yet tagged with records that context in both tiers.
    fn lookup(
        &self,
        fingerprint: &Fingerprint,
        context: Option<&ContextId>,
    ) -> Option<(Vector, CacheOutcome)> {
        if let Some((vector, retagged)) = self.memory.get_tagged(fingerprint, context) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            if let Some(tags) = retagged {
                if self.durable_enabled() {
                    self.spawn_store(DurableRecord::new(fingerprint.clone(), tags, &vector));
                }
            }
            return Some((vector, CacheOutcome::MemoryHit));
        }
        if self.durable_enabled() {
            match self.durable.load(fingerprint) {
                Ok(Some(record)) => match record.vector() {
                    Ok(vector) => {
                        let vector: Vector = Arc::from(vector);
                        let mut tags = record.tags;
                        if context.is_some() && tags.add(context) {
                            self.spawn_store(DurableRecord::new(
                                fingerprint.clone(),
                                tags.clone(),
                                &vector,
                            ));
                        }
                        self.insert_memory(fingerprint.clone(), tags, Arc::clone(&vector));
                        self.counters.hits.fetch_add(1, Ordering::Relaxed);
                        self.counters.durable_hits.fetch_add(1, Ordering::Relaxed);
                        return Some((vector, CacheOutcome::DurableHit));
                    }
                    Err(err) => self.discard_corrupt(fingerprint, &err),
                },
                Ok(None) => {}
                Err(err) if err.degrades_tier() => self.durable_failure(&err),
                Err(err) => self.discard_corrupt(fingerprint, &err),
            }
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn insert_memory(&self, fingerprint: Fingerprint, tags: ContextTags, vector: Vector) {
        if self.memory.put(fingerprint, CacheEntry::new(vector, tags)) {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn durable_enabled(&self) -> bool {
        self.durable.is_persistent() && !self.is_degraded()
    }

    fn spawn_store(&self, record: DurableRecord) {
        let durable = Arc::clone(&self.durable);
        let degraded = Arc::clone(&self.degraded);
        let generation = Arc::clone(&self.generation);
        let issued = *generation.read();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    // held across the store so a clear waits for it
                    let current = generation.read();
                    if *current != issued {
                        debug!(
                            target: "embedding.cache",
                            fingerprint = %record.fingerprint,
                            "cache.durable.stale_write_dropped"
                        );
                        return;
                    }
                    if let Err(err) = durable.store(&record) {
                        mark_degraded(&degraded, &err);
                    }
                });
            }
            Err(_) => {
                if let Err(err) = durable.store(&record) {
                    self.durable_failure(&err);
                }
            }
        }
    }

    fn discard_corrupt(&self, fingerprint: &Fingerprint, err: &CacheError) {
        self.counters.durable_errors.fetch_add(1, Ordering::Relaxed);
        warn!(
            target: "embedding.cache",
            fingerprint = %fingerprint,
            error = %err,
            "cache.durable.record_discarded"
        );
        if let Err(err) = self.durable.remove(fingerprint) {
            self.durable_failure(&err);
        }
    }

    fn durable_failure(&self, err: &CacheError) {
        self.counters.durable_errors.fetch_add(1, Ordering::Relaxed);
        mark_degraded(&self.degraded, err);
    }
}

fn mark_degraded(flag: &AtomicBool, err: &CacheError) {
    if !err.degrades_tier() {
        return;
    }
    if !flag.swap(true, Ordering::AcqRel) {
        warn!(
            target: "embedding.cache",
            error = %err,
            "cache.durable.degraded_to_memory_only"
        );
    }
}
