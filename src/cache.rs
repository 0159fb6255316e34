//! Result cache for successful orchestration runs.
//!
//! The cache is a side channel: a hit replays the stored results, a miss
//! changes nothing about how a fresh run is evaluated. Entries are keyed by
//! lockfile + manifest hashes plus a digest of the run options that shape
//! results (quick mode, warn-only, skips).
use crate::hashing::ContentHashes;
use crate::report::CheckResult;
use crate::util::write_json_atomic;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CACHE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub schema_version: u32,
    #[serde(flatten)]
    pub hashes: ContentHashes,
    pub options_digest: String,
    pub results: Vec<CheckResult>,
    /// Write time in epoch milliseconds.
    pub timestamp: i64,
}

/// Everything a stored entry must match to be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub hashes: ContentHashes,
    pub options_digest: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    Empty,
    SchemaChanged,
    Expired,
    HashMismatch,
    OptionsChanged,
    Unreadable,
}

impl MissReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissReason::Empty => "no cached entry",
            MissReason::SchemaChanged => "cache schema changed",
            MissReason::Expired => "cached entry expired",
            MissReason::HashMismatch => "lockfile or manifests changed",
            MissReason::OptionsChanged => "run options changed",
            MissReason::Unreadable => "cache unreadable",
        }
    }
}

#[derive(Debug)]
pub enum CacheLookup {
    Hit(CacheEntry),
    Miss(MissReason),
}

impl CacheEntry {
    pub fn new(key: &CacheKey, results: Vec<CheckResult>, timestamp: i64) -> Self {
        Self {
            schema_version: CACHE_SCHEMA_VERSION,
            hashes: key.hashes.clone(),
            options_digest: key.options_digest.clone(),
            results,
            timestamp,
        }
    }

    /// Why this entry cannot serve `key` at `now_ms`, if it cannot.
    pub fn rejection(&self, key: &CacheKey, ttl: Duration, now_ms: i64) -> Option<MissReason> {
        if self.schema_version != CACHE_SCHEMA_VERSION {
            return Some(MissReason::SchemaChanged);
        }
        let age_ms = now_ms.saturating_sub(self.timestamp);
        if age_ms < 0 || age_ms as u128 >= ttl.as_millis() {
            return Some(MissReason::Expired);
        }
        if self.hashes != key.hashes {
            return Some(MissReason::HashMismatch);
        }
        if self.options_digest != key.options_digest {
            return Some(MissReason::OptionsChanged);
        }
        None
    }
}

/// Persistence backend for the single cached run.
pub trait ResultCache: Send + Sync {
    fn load(&self) -> Result<Option<CacheEntry>>;
    fn store(&self, entry: &CacheEntry) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

pub fn lookup(cache: &dyn ResultCache, key: &CacheKey, ttl: Duration, now_ms: i64) -> CacheLookup {
    let entry = match cache.load() {
        Ok(Some(entry)) => entry,
        Ok(None) => return CacheLookup::Miss(MissReason::Empty),
        Err(err) => {
            tracing::warn!(error = %err, "ignoring unreadable cache");
            return CacheLookup::Miss(MissReason::Unreadable);
        }
    };
    match entry.rejection(key, ttl, now_ms) {
        Some(reason) => CacheLookup::Miss(reason),
        None => CacheLookup::Hit(entry),
    }
}

/// JSON file cache written via temp file + rename.
#[derive(Debug, Clone)]
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultCache for FileCache {
    fn load(&self) -> Result<Option<CacheEntry>> {
        if !self.path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path).with_context(|| format!("read {}", self.path.display()))?;
        let entry = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse {}", self.path.display()))?;
        Ok(Some(entry))
    }

    fn store(&self, entry: &CacheEntry) -> Result<()> {
        write_json_atomic(&self.path, entry)
            .with_context(|| format!("write cache {}", self.path.display()))
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("remove {}", self.path.display()))?;
        }
        Ok(())
    }
}

/// In-memory backend for orchestrator tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryCache {
    entry: std::sync::Mutex<Option<CacheEntry>>,
    pub stores: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MemoryCache {
    pub fn with_entry(entry: CacheEntry) -> Self {
        Self {
            entry: std::sync::Mutex::new(Some(entry)),
            stores: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn current(&self) -> Option<CacheEntry> {
        self.entry.lock().expect("cache lock").clone()
    }

    pub fn store_count(&self) -> usize {
        self.stores.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl ResultCache for MemoryCache {
    fn load(&self) -> Result<Option<CacheEntry>> {
        Ok(self.current())
    }

    fn store(&self, entry: &CacheEntry) -> Result<()> {
        *self.entry.lock().expect("cache lock") = Some(entry.clone());
        self.stores
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.entry.lock().expect("cache lock") = None;
        Ok(())
    }
}
