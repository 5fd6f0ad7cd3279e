//! Change-detection cache, snapshotted at `file-hashes.json`.
//!
//! The mtime is the cheap first-pass check; the content hash is the
//! second-chance check that catches touched-but-unmodified files before any
//! embedding work happens.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub hash: String,
    pub last_modified: i64,
    pub size: u64,
}

pub struct HashCache {
    path: PathBuf,
    entries: HashMap<String, CacheEntry>,
    dirty: bool,
}

impl HashCache {
    /// Load the snapshot from `dir/file-hashes.json`, starting empty when the
    /// file is missing or unreadable.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join("file-hashes.json");
        let entries = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        Self {
            path,
            entries,
            dirty: false,
        }
    }

    /// First-pass check: true unless we have an entry with a matching mtime.
    pub fn maybe_changed(&self, path: &str, mtime_ms: i64, _size: u64) -> bool {
        match self.entries.get(path) {
            Some(entry) => entry.last_modified != mtime_ms,
            None => true,
        }
    }

    /// Second-chance check against the freshly computed content hash.
    pub fn confirm_unchanged(&self, path: &str, content_hash: &str) -> bool {
        self.entries
            .get(path)
            .map(|entry| entry.hash == content_hash)
            .unwrap_or(false)
    }

    pub fn record(&mut self, path: &str, content_hash: &str, mtime_ms: i64, size: u64) {
        self.entries.insert(
            path.to_string(),
            CacheEntry {
                hash: content_hash.to_string(),
                last_modified: mtime_ms,
                size,
            },
        );
        self.dirty = true;
    }

    pub fn remove(&mut self, path: &str) {
        if self.entries.remove(path).is_some() {
            self.dirty = true;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the snapshot if anything changed since the last persist.
    pub fn persist(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let raw = serde_json::to_string_pretty(&self.entries)?;
        fs::write(&self.path, raw)
            .with_context(|| format!("writing {}", self.path.display()))?;
        self.dirty = false;
        debug!("persisted hash cache ({} entries)", self.entries.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn unknown_file_is_always_changed() {
        let dir = TempDir::new().unwrap();
        let cache = HashCache::load(dir.path());
        assert!(cache.maybe_changed("src/a.ts", 1000, 10));
        assert!(!cache.confirm_unchanged("src/a.ts", "abc"));
    }

    #[test]
    fn matching_mtime_means_unchanged() {
        let dir = TempDir::new().unwrap();
        let mut cache = HashCache::load(dir.path());
        cache.record("src/a.ts", "abc", 1000, 10);
        assert!(!cache.maybe_changed("src/a.ts", 1000, 10));
        assert!(cache.maybe_changed("src/a.ts", 2000, 10));
    }

    #[test]
    fn second_chance_catches_touched_files() {
        let dir = TempDir::new().unwrap();
        let mut cache = HashCache::load(dir.path());
        cache.record("src/a.ts", "abc", 1000, 10);
        // mtime bumped but content identical
        assert!(cache.maybe_changed("src/a.ts", 2000, 10));
        assert!(cache.confirm_unchanged("src/a.ts", "abc"));
        assert!(!cache.confirm_unchanged("src/a.ts", "def"));
    }

    #[test]
    fn persists_only_when_dirty_and_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut cache = HashCache::load(dir.path());
        cache.persist().unwrap();
        assert!(!dir.path().join("file-hashes.json").exists());

        cache.record("src/a.ts", "abc", 1000, 10);
        cache.persist().unwrap();
        assert!(dir.path().join("file-hashes.json").exists());

        let reloaded = HashCache::load(dir.path());
        assert_eq!(reloaded.len(), 1);
        assert!(!reloaded.maybe_changed("src/a.ts", 1000, 10));
    }

    #[test]
    fn removal_forgets_the_file() {
        let dir = TempDir::new().unwrap();
        let mut cache = HashCache::load(dir.path());
        cache.record("src/a.ts", "abc", 1000, 10);
        cache.remove("src/a.ts");
        assert!(cache.maybe_changed("src/a.ts", 1000, 10));
    }
}
