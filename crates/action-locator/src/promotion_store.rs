//! Locator promotion statistics
//!
//! Success and failure counts per (locator, context), turned into a bounded
//! score that feeds the promotion signal. Locators are keyed by their
//! normalized rendering, so equivalent spellings share one record.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use locator_core_types::ContextId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::locator::normalize_locator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// Score change per success or failure
    pub step: f32,
    pub floor: f32,
    pub ceiling: f32,
    /// JSON file the records are persisted to; memory only when unset
    pub path: Option<PathBuf>,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            step: 0.1,
            floor: -0.5,
            ceiling: 1.0,
            path: None,
        }
    }
}

impl PromotionConfig {
    pub fn is_valid(&self) -> bool {
        self.step.is_finite()
            && self.step >= 0.0
            && self.floor.is_finite()
            && self.ceiling.is_finite()
            && self.floor <= self.ceiling
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PromotionRecord {
    pub success_count: u32,
    pub failure_count: u32,
    pub score: f32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedRecord {
    locator: String,
    context: ContextId,
    #[serde(flatten)]
    record: PromotionRecord,
}

type Key = (String, ContextId);

pub struct PromotionStore {
    records: Arc<DashMap<Key, PromotionRecord>>,
    config: PromotionConfig,
    write_lock: Arc<Mutex<()>>,
}

impl PromotionStore {
    /// Opens the store, loading persisted records when a path is configured.
    /// An unreadable file starts the store empty.
    pub fn new(config: PromotionConfig) -> Self {
        let records = DashMap::new();
        if let Some(path) = &config.path {
            match load_records(path) {
                Ok(loaded) => {
                    debug!(
                        target: "locator.events",
                        event = "promotion.loaded",
                        path = %path.display(),
                        count = loaded.len(),
                        "promotion records loaded"
                    );
                    for entry in loaded {
                        records.insert((entry.locator, entry.context), entry.record);
                    }
                }
                Err(err) => warn!(
                    target: "locator.events",
                    event = "promotion.load_failed",
                    path = %path.display(),
                    error = %err,
                    "promotion file unreadable; starting empty"
                ),
            }
        }
        Self {
            records: Arc::new(records),
            config,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(PromotionConfig::default())
    }

    pub fn config(&self) -> &PromotionConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, locator: &str, context: &ContextId) -> Option<PromotionRecord> {
        self.records
            .get(&(key(locator), context.clone()))
            .map(|entry| *entry.value())
    }

    /// Current score; zero for locators never seen in this context.
    pub fn score(&self, locator: &str, context: &ContextId) -> f32 {
        self.record(locator, context)
            .map(|record| record.score)
            .unwrap_or(0.0)
    }

    pub fn has_context(&self, context: &ContextId) -> bool {
        self.records.iter().any(|entry| &entry.key().1 == context)
    }

    pub fn promote(&self, locator: &str, context: &ContextId) -> PromotionRecord {
        let step = self.config.step;
        let ceiling = self.config.ceiling;
        let updated = self.update(locator, context, |record| {
            record.success_count = record.success_count.saturating_add(1);
            record.score = (record.score + step).min(ceiling);
        });
        debug!(
            target: "locator.events",
            event = "promotion.promoted",
            locator,
            context = %context,
            score = updated.score,
            "locator promoted"
        );
        updated
    }

    pub fn demote(&self, locator: &str, context: &ContextId) -> PromotionRecord {
        let step = self.config.step;
        let floor = self.config.floor;
        let updated = self.update(locator, context, |record| {
            record.failure_count = record.failure_count.saturating_add(1);
            record.score = (record.score - step).max(floor);
        });
        debug!(
            target: "locator.events",
            event = "promotion.demoted",
            locator,
            context = %context,
            score = updated.score,
            "locator demoted"
        );
        updated
    }

    pub fn clear_all(&self) {
        self.records.clear();
        self.persist();
    }

    pub fn clear_context(&self, context: &ContextId) -> usize {
        let before = self.records.len();
        self.records.retain(|(_, ctx), _| ctx != context);
        let removed = before.saturating_sub(self.records.len());
        if removed > 0 {
            self.persist();
        }
        removed
    }

    fn update<F>(&self, locator: &str, context: &ContextId, apply: F) -> PromotionRecord
    where
        F: FnOnce(&mut PromotionRecord),
    {
        let updated = {
            let mut entry = self
                .records
                .entry((key(locator), context.clone()))
                .or_default();
            let record = entry.value_mut();
            apply(record);
            record.updated_at = Some(Utc::now());
            *record
        };
        self.persist();
        updated
    }

    /// Rewrites the file off the caller's path when a runtime is available.
    /// Each write serialises the state current at write time.
    fn persist(&self) {
        let Some(path) = self.config.path.clone() else {
            return;
        };
        let records = Arc::clone(&self.records);
        let lock = Arc::clone(&self.write_lock);
        let write = move || {
            let _guard = lock.lock();
            if let Err(err) = write_records(&path, &records) {
                warn!(
                    target: "locator.events",
                    event = "promotion.persist_failed",
                    path = %path.display(),
                    error = %err,
                    "promotion records not persisted"
                );
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(write);
            }
            Err(_) => write(),
        }
    }
}

impl Default for PromotionStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn key(locator: &str) -> String {
    normalize_locator(locator).unwrap_or_else(|_| locator.trim().to_string())
}

fn load_records(path: &Path) -> io::Result<Vec<PersistedRecord>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    serde_json::from_slice(&data).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

fn write_records(path: &Path, records: &DashMap<Key, PromotionRecord>) -> io::Result<()> {
    let mut entries: Vec<PersistedRecord> = records
        .iter()
        .map(|entry| PersistedRecord {
            locator: entry.key().0.clone(),
            context: entry.key().1.clone(),
            record: *entry.value(),
        })
        .collect();
    entries.sort_by(|a, b| (&a.context.0, &a.locator).cmp(&(&b.context.0, &b.locator)));
    let data = serde_json::to_vec_pretty(&entries)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)?;
    file.write_all(&data)?;
    file.sync_all()?;
    fs::rename(tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(name: &str) -> ContextId {
        ContextId::new(name)
    }

    #[test]
    fn promotion_is_monotonic_and_capped() {
        let store = PromotionStore::in_memory();
        let mut last = store.score("#save", &ctx("checkout"));
        for _ in 0..20 {
            let record = store.promote("#save", &ctx("checkout"));
            assert!(record.score >= last);
            last = record.score;
        }
        assert!((last - 1.0).abs() < 1e-6);
        assert_eq!(store.record("#save", &ctx("checkout")).unwrap().success_count, 20);
    }

    #[test]
    fn demotion_is_floored() {
        let store = PromotionStore::in_memory();
        let mut last = 0.0;
        for _ in 0..20 {
            let record = store.demote("#save", &ctx("checkout"));
            assert!(record.score <= last);
            last = record.score;
        }
        assert!((last + 0.5).abs() < 1e-6);
    }

    #[test]
    fn equivalent_spellings_share_a_record() {
        let store = PromotionStore::in_memory();
        store.promote("button[name='go']", &ctx("a"));
        store.promote("button[name=\"go\"]", &ctx("a"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.record("button[name=\"go\"]", &ctx("a")).unwrap().success_count, 2);
    }

    #[test]
    fn contexts_are_isolated() {
        let store = PromotionStore::in_memory();
        store.promote("#save", &ctx("a"));
        store.promote("#save", &ctx("b"));
        assert!(store.has_context(&ctx("a")));
        assert_eq!(store.clear_context(&ctx("a")), 1);
        assert!(!store.has_context(&ctx("a")));
        assert!(store.score("#save", &ctx("b")) > 0.0);
        store.clear_all();
        assert!(store.is_empty());
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("promotion.json");
        let config = PromotionConfig {
            path: Some(path.clone()),
            ..PromotionConfig::default()
        };
        {
            let store = PromotionStore::new(config.clone());
            store.promote("#save", &ctx("checkout"));
            store.demote("#cancel", &ctx("checkout"));
        }
        assert!(path.exists());
        let reopened = PromotionStore::new(config);
        assert!(reopened.score("#save", &ctx("checkout")) > 0.0);
        assert!(reopened.score("#cancel", &ctx("checkout")) < 0.0);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("promotion.json");
        std::fs::write(&path, b"not json").unwrap();
        let store = PromotionStore::new(PromotionConfig {
            path: Some(path),
            ..PromotionConfig::default()
        });
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_keep_every_increment() {
        let store = Arc::new(PromotionStore::in_memory());
        let mut tasks = Vec::new();
        for worker in 0..8 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    if worker % 2 == 0 {
                        store.promote("#save", &ctx("checkout"));
                    } else {
                        store.demote("#save", &ctx("checkout"));
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let record = store.record("#save", &ctx("checkout")).unwrap();
        assert_eq!(record.success_count, 200);
        assert_eq!(record.failure_count, 200);
        assert_eq!(store.len(), 1);
        let config = store.config();
        assert!(record.score >= config.floor && record.score <= config.ceiling);
    }
}
