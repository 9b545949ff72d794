//! Durable tier: one JSON record per fingerprint, sharded by hash prefix.
//!
//! Layout: `<root>/<shard>/<fingerprint>.json` where `shard` is the first two
//! hex characters of the fingerprint digest. Records survive restarts and are
//! only removed by an explicit clear.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use locator_core_types::{ContextId, Fingerprint};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::CacheError;
use crate::memory::ContextTags;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DurableRecord {
    pub fingerprint: Fingerprint,
    #[serde(default)]
    pub tags: ContextTags,
    pub dim: usize,
    /// Little-endian `f32` values, base64 encoded.
    pub vector_b64: String,
    pub stored_at: DateTime<Utc>,
}

impl DurableRecord {
    pub fn new(fingerprint: Fingerprint, tags: ContextTags, vector: &[f32]) -> Self {
        Self {
            fingerprint,
            tags,
            dim: vector.len(),
            vector_b64: encode_vector(vector),
            stored_at: Utc::now(),
        }
    }

    pub fn vector(&self) -> Result<Vec<f32>, CacheError> {
        let vector = decode_vector(&self.vector_b64)?;
        if vector.len() != self.dim {
            return Err(CacheError::Corrupt(format!(
                "{}: expected {} values, found {}",
                self.fingerprint,
                self.dim,
                vector.len()
            )));
        }
        Ok(vector)
    }
}

pub fn encode_vector(vector: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

pub fn decode_vector(encoded: &str) -> Result<Vec<f32>, CacheError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|err| CacheError::Corrupt(err.to_string()))?;
    if bytes.len() % 4 != 0 {
        return Err(CacheError::Corrupt(format!(
            "vector blob of {} bytes is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Persistent second tier behind the in-memory LRU.
pub trait DurableTier: Send + Sync {
    fn load(&self, fingerprint: &Fingerprint) -> Result<Option<DurableRecord>, CacheError>;

    fn store(&self, record: &DurableRecord) -> Result<(), CacheError>;

    fn remove(&self, fingerprint: &Fingerprint) -> Result<(), CacheError>;

    fn clear(&self) -> Result<(), CacheError>;

    /// Untags `context` from every record and removes the records no other
    /// context still holds, returning how many went.
    fn clear_context(&self, context: &ContextId) -> Result<usize, CacheError>;

    fn is_persistent(&self) -> bool {
        true
    }
}

/// Memory-only operation.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullDurableTier;

impl DurableTier for NullDurableTier {
    fn load(&self, _fingerprint: &Fingerprint) -> Result<Option<DurableRecord>, CacheError> {
        Ok(None)
    }

    fn store(&self, _record: &DurableRecord) -> Result<(), CacheError> {
        Ok(())
    }

    fn remove(&self, _fingerprint: &Fingerprint) -> Result<(), CacheError> {
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn clear_context(&self, _context: &ContextId) -> Result<usize, CacheError> {
        Ok(0)
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

/// Record writes are serialized so concurrent taggings of one vector
/// merge instead of overwriting each other.
#[derive(Clone, Debug)]
pub struct FsDurableTier {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FsDurableTier {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        let raw = fingerprint.as_str();
        let digest = raw.rsplit('_').next().unwrap_or(raw);
        let shard: String = digest.chars().take(2).collect();
        let file: String = raw
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '-' })
            .collect();
        let mut path = self.root.clone();
        path.push(if shard.is_empty() { "00".to_string() } else { shard });
        path.push(format!("{file}.json"));
        path
    }

    fn record_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut files = Vec::new();
        if !self.root.exists() {
            return Ok(files);
        }
        for shard in fs::read_dir(&self.root)? {
            let shard = shard?.path();
            if !shard.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&shard)? {
                let path = entry?.path();
                if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }
}

impl DurableTier for FsDurableTier {
    fn load(&self, fingerprint: &Fingerprint) -> Result<Option<DurableRecord>, CacheError> {
        let path = self.record_path(fingerprint);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record: DurableRecord = serde_json::from_slice(&data)
            .map_err(|err| CacheError::Corrupt(format!("{}: {err}", path.display())))?;
        if &record.fingerprint != fingerprint {
            return Err(CacheError::Corrupt(format!(
                "{} holds {}",
                path.display(),
                record.fingerprint
            )));
        }
        Ok(Some(record))
    }

    fn store(&self, record: &DurableRecord) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock();
        let path = self.record_path(&record.fingerprint);
        let mut record = record.clone();
        if let Ok(Some(existing)) = self.load(&record.fingerprint) {
            record.tags.merge(&existing.tags);
        }
        let data = serde_json::to_vec(&record).map_err(CacheError::io)?;
        write_atomic(&path, &data)?;
        Ok(())
    }

    fn remove(&self, fingerprint: &Fingerprint) -> Result<(), CacheError> {
        match fs::remove_file(self.record_path(fingerprint)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock();
        if self.root.exists() {
            for entry in fs::read_dir(&self.root)? {
                let path = entry?.path();
                if path.is_dir() {
                    fs::remove_dir_all(&path)?;
                } else {
                    fs::remove_file(&path)?;
                }
            }
        }
        Ok(())
    }

    fn clear_context(&self, context: &ContextId) -> Result<usize, CacheError> {
        let _guard = self.write_lock.lock();
        let mut removed = 0;
        for path in self.record_files()? {
            let data = fs::read(&path)?;
            // unreadable records are left for `load` to discard
            let Ok(mut record) = serde_json::from_slice::<DurableRecord>(&data) else {
                continue;
            };
            if !record.tags.contains(context) {
                continue;
            }
            if record.tags.release(context) {
                fs::remove_file(&path)?;
                removed += 1;
            } else {
                let data = serde_json::to_vec(&record).map_err(CacheError::io)?;
                write_atomic(&path, &data)?;
            }
        }
        Ok(removed)
    }
}

/// Distinguishes temp files of concurrent writes to one record.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("tmp{seq}"));
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_blob_round_trips_bit_exact() {
        let vector = vec![0.25f32, -1.5, f32::MIN_POSITIVE, 3.0e-7];
        let decoded = decode_vector(&encode_vector(&vector)).unwrap();
        assert!(vector
            .iter()
            .zip(&decoded)
            .all(|(a, b)| a.to_bits() == b.to_bits()));
        assert!(decode_vector("AAA=").is_err());
    }

    #[test]
    fn fs_tier_stores_and_clears_by_context() {
        let dir = tempfile::tempdir().unwrap();
        let tier = FsDurableTier::open(dir.path()).unwrap();
        let checkout = ContextId::new("checkout");
        let a = Fingerprint("el_ab12".into());
        let b = Fingerprint("el_cd34".into());

        tier.store(&DurableRecord::new(a.clone(), ContextTags::of(Some(&checkout)), &[1.0, 2.0]))
            .unwrap();
        tier.store(&DurableRecord::new(b.clone(), ContextTags::of(None), &[3.0])).unwrap();

        let loaded = tier.load(&a).unwrap().unwrap();
        assert_eq!(loaded.vector().unwrap(), vec![1.0, 2.0]);
        assert!(dir.path().join("ab").join("el_ab12.json").exists());

        assert_eq!(tier.clear_context(&checkout).unwrap(), 1);
        assert!(tier.load(&a).unwrap().is_none());
        assert!(tier.load(&b).unwrap().is_some());

        tier.clear().unwrap();
        assert!(tier.load(&b).unwrap().is_none());
    }

    #[test]
    fn clear_context_keeps_records_other_contexts_hold() {
        let dir = tempfile::tempdir().unwrap();
        let tier = FsDurableTier::open(dir.path()).unwrap();
        let login = ContextId::new("login");
        let search = ContextId::new("search");
        let fp = Fingerprint("el_ab12".into());
        let mut tags = ContextTags::of(Some(&login));
        tags.add(Some(&search));
        tier.store(&DurableRecord::new(fp.clone(), tags, &[1.0])).unwrap();

        assert_eq!(tier.clear_context(&login).unwrap(), 0);
        let kept = tier.load(&fp).unwrap().unwrap();
        assert!(!kept.tags.contains(&login));
        assert!(kept.tags.contains(&search));

        assert_eq!(tier.clear_context(&search).unwrap(), 1);
        assert!(tier.load(&fp).unwrap().is_none());
    }

    #[test]
    fn corrupt_record_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let tier = FsDurableTier::open(dir.path()).unwrap();
        let fp = Fingerprint("el_ffee".into());
        let path = tier.record_path(&fp);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{not json").unwrap();
        let err = tier.load(&fp).unwrap_err();
        assert!(matches!(err, CacheError::Corrupt(_)));
        assert!(!err.degrades_tier());
    }
}
