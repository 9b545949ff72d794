use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use locator_core_types::{ContextId, Fingerprint};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub type Vector = Arc<[f32]>;

/// Contexts a vector was written or read under. A vector also used without
/// any context is `shared` and survives every context clear.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTags {
    #[serde(default)]
    pub contexts: BTreeSet<ContextId>,
    #[serde(default)]
    pub shared: bool,
}

impl ContextTags {
    pub fn of(context: Option<&ContextId>) -> Self {
        let mut tags = Self::default();
        tags.add(context);
        tags
    }

    /// Returns `true` when the tag set changed.
    pub fn add(&mut self, context: Option<&ContextId>) -> bool {
        match context {
            Some(context) => self.contexts.insert(context.clone()),
            None => !std::mem::replace(&mut self.shared, true),
        }
    }

    pub fn merge(&mut self, other: &ContextTags) {
        self.contexts.extend(other.contexts.iter().cloned());
        self.shared |= other.shared;
    }

    pub fn contains(&self, context: &ContextId) -> bool {
        self.contexts.contains(context)
    }

    /// Drops `context`; `true` when nothing holds the vector any more.
    pub fn release(&mut self, context: &ContextId) -> bool {
        self.contexts.remove(context) && self.contexts.is_empty() && !self.shared
    }
}

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub vector: Vector,
    pub tags: ContextTags,
    pub last_access: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(vector: Vector, tags: ContextTags) -> Self {
        Self {
            vector,
            tags,
            last_access: Utc::now(),
        }
    }
}

/// Bounded LRU tier. Every read and write goes through one mutex, so
/// recency order cannot be corrupted by concurrent resolutions.
pub struct MemoryTier {
    inner: Mutex<LruCache<Fingerprint, CacheEntry>>,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit promotes the entry to most-recently-used.
    pub fn get(&self, key: &Fingerprint) -> Option<Vector> {
        self.get_tagged(key, None).map(|(vector, _)| vector)
    }

    /// Like [`MemoryTier::get`], also tagging the entry with `context`. The
    /// returned tags are `Some` only when the hit added a new one.
    pub fn get_tagged(
        &self,
        key: &Fingerprint,
        context: Option<&ContextId>,
    ) -> Option<(Vector, Option<ContextTags>)> {
        let mut guard = self.inner.lock();
        guard.get_mut(key).map(|entry| {
            entry.last_access = Utc::now();
            let added = context.is_some() && entry.tags.add(context);
            (Arc::clone(&entry.vector), added.then(|| entry.tags.clone()))
        })
    }

    pub fn contains(&self, key: &Fingerprint) -> bool {
        self.inner.lock().contains(key)
    }

    /// Inserts or refreshes `key`, keeping the tags of the entry it replaces;
    /// returns `true` when another entry was evicted.
    pub fn put(&self, key: Fingerprint, mut entry: CacheEntry) -> bool {
        let mut guard = self.inner.lock();
        if let Some(existing) = guard.peek(&key) {
            entry.tags.merge(&existing.tags);
        }
        match guard.push(key.clone(), entry) {
            Some((evicted, _)) => evicted != key,
            None => false,
        }
    }

    pub fn tags(&self, key: &Fingerprint) -> Option<ContextTags> {
        self.inner.lock().peek(key).map(|entry| entry.tags.clone())
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Untags `context` everywhere and drops the entries no other context
    /// still holds. Returns how many were dropped.
    pub fn remove_context(&self, context: &ContextId) -> usize {
        let mut guard = self.inner.lock();
        let released: Vec<Fingerprint> = guard
            .iter_mut()
            .filter_map(|(key, entry)| entry.tags.release(context).then(|| key.clone()))
            .collect();
        for key in &released {
            guard.pop(key);
        }
        released.len()
    }
}
