//! Durable store of validated stage payloads
//!
//! Entries are addressed by `(project, role)`. Each entry remembers the
//! source hash it was computed from, so a changed project invalidates it
//! without any explicit bookkeeping. The directory backend keeps one JSON
//! file per key, named by the MD5 of the key, and loads them all on open.

use crate::assessment::{StagePayload, StageRole};
use crate::facts::ProjectFingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default maximum age of a cache entry
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize cache entry: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Aggregator payloads are not cacheable")]
    NotCacheable,
    #[error("Payload for {actual} cannot be stored under {expected}")]
    RoleMismatch {
        expected: StageRole,
        actual: StageRole,
    },
}

impl CacheError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub project: String,
    pub role: StageRole,
    pub payload: StagePayload,
    pub source_hash: String,
    pub confidence: f64,
    pub model: String,
    pub captured_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Stale if computed from different sources or older than `max_age` at `now`
    pub fn is_stale_at(
        &self,
        fingerprint: &ProjectFingerprint,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        self.source_hash != fingerprint.source_hash || self.is_expired_at(max_age, now)
    }

    pub fn is_expired_at(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return false;
        };
        now.signed_duration_since(self.captured_at) > max_age
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    project: String,
    role: StageRole,
}

impl CacheKey {
    fn new(project: &str, role: StageRole) -> Self {
        Self {
            project: project.to_string(),
            role,
        }
    }

    fn file_name(&self) -> String {
        let raw = format!("{}\u{0}{}", self.project, self.role.as_str());
        format!("{:x}.json", md5::compute(raw.as_bytes()))
    }
}

#[derive(Debug)]
enum Backend {
    Directory(PathBuf),
    Memory,
}

#[derive(Debug)]
pub struct CacheStore {
    backend: Backend,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl CacheStore {
    /// Opens (creating if needed) a directory-backed store and loads its entries
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

        let mut entries = HashMap::new();
        let listing = std::fs::read_dir(&dir).map_err(|e| CacheError::io(&dir, e))?;
        for item in listing {
            let path = match item {
                Ok(item) => item.path(),
                Err(e) => {
                    warn!("Skipping unreadable cache directory entry: {}", e);
                    continue;
                }
            };
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match load_entry(&path) {
                Ok(entry) => {
                    entries.insert(CacheKey::new(&entry.project, entry.role), entry);
                }
                Err(e) => warn!(path = %path.display(), "Skipping corrupt cache file: {}", e),
            }
        }

        info!(dir = %dir.display(), entries = entries.len(), "Opened analysis cache");

        Ok(Self {
            backend: Backend::Directory(dir),
            entries: RwLock::new(entries),
        })
    }

    /// Volatile store that forgets everything on drop
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> Option<&Path> {
        match &self.backend {
            Backend::Directory(dir) => Some(dir),
            Backend::Memory => None,
        }
    }

    /// Entry stored for the fingerprint's project and `role`, fresh or not
    pub fn get(&self, fingerprint: &ProjectFingerprint, role: StageRole) -> Option<CacheEntry> {
        self.read()
            .get(&CacheKey::new(&fingerprint.project, role))
            .cloned()
    }

    /// Entry for `role` only if it is still valid for `fingerprint`
    pub fn get_fresh(
        &self,
        fingerprint: &ProjectFingerprint,
        role: StageRole,
        max_age: Duration,
    ) -> Option<CacheEntry> {
        let entry = self.get(fingerprint, role)?;
        if Self::is_stale(&entry, fingerprint, max_age) {
            debug!(
                project = %fingerprint.project,
                role = %role,
                captured_at = %entry.captured_at,
                "Ignoring stale cache entry"
            );
            return None;
        }
        Some(entry)
    }

    pub fn is_stale(entry: &CacheEntry, fingerprint: &ProjectFingerprint, max_age: Duration) -> bool {
        entry.is_stale_at(fingerprint, max_age, Utc::now())
    }

    /// Stores a validated payload, replacing any previous entry for the key
    pub fn put(
        &self,
        fingerprint: &ProjectFingerprint,
        role: StageRole,
        payload: StagePayload,
        source_hash: &str,
        confidence: f64,
        model: &str,
    ) -> Result<CacheEntry, CacheError> {
        if !role.is_cacheable() {
            return Err(CacheError::NotCacheable);
        }
        if payload.role() != role {
            return Err(CacheError::RoleMismatch {
                expected: role,
                actual: payload.role(),
            });
        }

        let entry = CacheEntry {
            project: fingerprint.project.clone(),
            role,
            payload,
            source_hash: source_hash.to_string(),
            confidence,
            model: model.to_string(),
            captured_at: Utc::now(),
        };
        self.insert(entry.clone())?;
        Ok(entry)
    }

    /// Stores a prebuilt entry as is
    ///
    /// The file write and the map update happen under the write lock, so
    /// concurrent writers leave disk and memory holding the same entry.
    pub fn insert(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let key = CacheKey::new(&entry.project, entry.role);
        let mut entries = self.write();
        if let Backend::Directory(dir) = &self.backend {
            write_atomic(&dir.join(key.file_name()), &entry)?;
        }
        debug!(project = %entry.project, role = %entry.role, "Cached stage payload");
        entries.insert(key, entry);
        Ok(())
    }

    /// Drops every entry of `project`; returns how many were removed
    pub fn invalidate(&self, project: &str) -> Result<usize, CacheError> {
        let mut entries = self.write();
        let keys: Vec<CacheKey> = entries
            .keys()
            .filter(|key| key.project == project)
            .cloned()
            .collect();
        self.remove_keys(&mut entries, &keys)
    }

    /// Drops entries older than `max_age`; returns how many were removed
    pub fn prune_stale(&self, max_age: Duration) -> Result<usize, CacheError> {
        let now = Utc::now();
        let mut entries = self.write();
        let keys: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(max_age, now))
            .map(|(key, _)| key.clone())
            .collect();
        let removed = self.remove_keys(&mut entries, &keys)?;
        if removed > 0 {
            info!(removed, "Pruned expired cache entries");
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn remove_keys(
        &self,
        entries: &mut HashMap<CacheKey, CacheEntry>,
        keys: &[CacheKey],
    ) -> Result<usize, CacheError> {
        let mut removed = 0;
        for key in keys {
            if let Backend::Directory(dir) = &self.backend {
                let path = dir.join(key.file_name());
                match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(CacheError::io(&path, e)),
                }
            }
            if entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    // A poisoned lock still holds a consistent map: every mutation is a single insert/remove
    fn read(&self) -> RwLockReadGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn load_entry(path: &Path) -> Result<CacheEntry, CacheError> {
    let contents = std::fs::read_to_string(path).map_err(|e| CacheError::io(path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

fn write_atomic(path: &Path, entry: &CacheEntry) -> Result<(), CacheError> {
    let contents = serde_json::to_string_pretty(entry)?;
    let tmp = path.with_extension(format!(
        "json.tmp-{}-{}",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::write(&tmp, contents).map_err(|e| CacheError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        CacheError::io(path, e)
    })
}
