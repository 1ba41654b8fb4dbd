//! File-backed cache with per-entry TTLs.
//!
//! Each namespace is a subdirectory of the cache root and each entry is a
//! single JSON file named by the SHA-256 of its key. Entries are written to
//! a temp file in the same directory and renamed into place, so a reader
//! sees either the old entry or the new one, never a partial write.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use whodis_core::{
    AnalysisOptions, CacheError, ErrorExt, DEFAULT_ANALYSIS_TTL_DAYS,
    SUBREDDIT_DESCRIPTION_TTL_DAYS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    SubredditDescriptions,
    AnalysisResults,
}

impl Namespace {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Namespace::SubredditDescriptions => "subreddits",
            Namespace::AnalysisResults => "analyses",
        }
    }

    pub fn default_ttl_days(&self) -> u32 {
        match self {
            Namespace::SubredditDescriptions => SUBREDDIT_DESCRIPTION_TTL_DAYS,
            Namespace::AnalysisResults => DEFAULT_ANALYSIS_TTL_DAYS,
        }
    }

    pub fn all() -> [Namespace; 2] {
        [Namespace::SubredditDescriptions, Namespace::AnalysisResults]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Enabled,
    Disabled,
}

/// Logical cache key. The on-disk file name is derived from it, so keys may
/// contain any characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn subreddit(name: &str) -> Self {
        Self(format!("subreddit:{}", name.to_lowercase()))
    }

    /// Username plus the options fingerprint, so two runs with different
    /// limits or truncation settings never share an entry.
    pub fn analysis(username: &str, options: &AnalysisOptions) -> Self {
        Self(format!(
            "analysis:{}:{}",
            username.to_lowercase(),
            options.fingerprint()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn file_name(&self) -> String {
        format!("{}.json", hex::encode(Sha256::digest(self.0.as_bytes())))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: T,
    pub timestamp: DateTime<Utc>,
    pub ttl_days: u32,
}

impl<T> CacheEntry<T> {
    /// `None` when `timestamp + ttl_days` is past the last representable
    /// instant; such an entry never expires.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Duration::try_days(i64::from(self.ttl_days))
            .and_then(|ttl| self.timestamp.checked_add_signed(ttl))
    }

    /// Valid up to and including `timestamp + ttl_days`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().map_or(true, |expiry| now <= expiry)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }
}

#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
    mode: CacheMode,
}

impl DiskCache {
    /// No directory is touched until the first write.
    pub fn new(root: impl Into<PathBuf>, mode: CacheMode) -> Self {
        Self {
            root: root.into(),
            mode,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_enabled(&self) -> bool {
        self.mode == CacheMode::Enabled
    }

    fn namespace_dir(&self, ns: Namespace) -> PathBuf {
        self.root.join(ns.dir_name())
    }

    fn entry_path(&self, ns: Namespace, key: &CacheKey) -> PathBuf {
        self.namespace_dir(ns).join(key.file_name())
    }

    pub fn get<T: DeserializeOwned>(&self, ns: Namespace, key: &CacheKey) -> Option<CacheEntry<T>> {
        self.get_at(ns, key, Utc::now())
    }

    /// Absent, expired, unreadable and corrupt entries all read as a miss.
    pub fn get_at<T: DeserializeOwned>(
        &self,
        ns: Namespace,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> Option<CacheEntry<T>> {
        if !self.is_enabled() {
            return None;
        }

        let path = self.entry_path(ns, key);
        let entry: CacheEntry<T> = match read_entry(&path) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!("Cache miss for {} in {}", key.as_str(), ns.dir_name());
                return None;
            }
            Err(e) => {
                e.log_warn();
                return None;
            }
        };

        if entry.key != key.as_str() {
            warn!(
                "Cache entry {} holds key '{}', expected '{}'",
                path.display(),
                entry.key,
                key.as_str()
            );
            return None;
        }

        if !entry.is_valid_at(now) {
            debug!(
                "Cache entry for {} stored at {} outlived its {} day TTL",
                key.as_str(),
                entry.timestamp,
                entry.ttl_days
            );
            return None;
        }

        debug!("Cache hit for {} in {}", key.as_str(), ns.dir_name());
        Some(entry)
    }

    pub fn put<T: Serialize>(
        &self,
        ns: Namespace,
        key: &CacheKey,
        value: &T,
        ttl_days: u32,
    ) -> Result<(), CacheError> {
        self.put_at(ns, key, value, ttl_days, Utc::now())
    }

    /// Replaces any existing entry for `key` with one stamped at `now`.
    pub fn put_at<T: Serialize>(
        &self,
        ns: Namespace,
        key: &CacheKey,
        value: &T,
        ttl_days: u32,
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        if !self.is_enabled() {
            return Ok(());
        }

        let dir = self.namespace_dir(ns);
        let path = self.entry_path(ns, key);
        let write_failed = |reason: String| CacheError::WriteFailed {
            path: path.display().to_string(),
            reason,
        };

        fs::create_dir_all(&dir).map_err(|e| write_failed(e.to_string()))?;

        let entry = CacheEntry {
            key: key.as_str().to_string(),
            value,
            timestamp: now,
            ttl_days,
        };

        let mut tmp =
            tempfile::NamedTempFile::new_in(&dir).map_err(|e| write_failed(e.to_string()))?;
        serde_json::to_writer_pretty(&mut tmp, &entry).map_err(|e| write_failed(e.to_string()))?;
        tmp.flush().map_err(|e| write_failed(e.to_string()))?;
        tmp.persist(&path)
            .map_err(|e| write_failed(e.error.to_string()))?;

        debug!(
            "Cached {} in {} for {} days",
            key.as_str(),
            ns.dir_name(),
            ttl_days
        );
        Ok(())
    }

    pub fn invalidate(&self, ns: Namespace, key: &CacheKey) -> Result<(), CacheError> {
        if !self.is_enabled() {
            return Ok(());
        }

        let path = self.entry_path(ns, key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Invalidated {} in {}", key.as_str(), ns.dir_name());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::WriteFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    pub fn prune_expired(&self, ns: Namespace) -> Result<usize, CacheError> {
        self.prune_expired_at(ns, Utc::now())
    }

    /// Deletes expired and corrupt entry files, returning how many were
    /// removed. Stray temp files are left alone.
    pub fn prune_expired_at(&self, ns: Namespace, now: DateTime<Utc>) -> Result<usize, CacheError> {
        if !self.is_enabled() {
            return Ok(0);
        }

        let dir = self.namespace_dir(ns);
        let read_failed = |reason: String| CacheError::ReadFailed {
            path: dir.display().to_string(),
            reason,
        };

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(read_failed(e.to_string())),
        };

        let mut removed = 0;
        for dir_entry in entries {
            let path = dir_entry.map_err(|e| read_failed(e.to_string()))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let stale = match read_entry::<serde_json::Value>(&path) {
                Ok(Some(entry)) => !entry.is_valid_at(now),
                Ok(None) => false,
                Err(_) => true,
            };

            if stale {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(CacheError::WriteFailed {
                            path: path.display().to_string(),
                            reason: e.to_string(),
                        })
                    }
                }
            }
        }

        if removed > 0 {
            info!("Pruned {} stale entries from {}", removed, ns.dir_name());
        }
        Ok(removed)
    }
}

fn read_entry<T: DeserializeOwned>(path: &Path) -> Result<Option<CacheEntry<T>>, CacheError> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(CacheError::ReadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
        }
    };

    serde_json::from_slice(&contents)
        .map(Some)
        .map_err(|e| CacheError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}
