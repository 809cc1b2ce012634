//! On-disk cache backend.
//!
//! One `<key>.json` file per entry. Writes go through a temp file plus
//! rename so readers never see a torn entry. Write failures are logged and
//! dropped; unreadable entries are treated as misses and removed.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::Mutex;

use super::{CacheCounters, CacheStats, CachedResponse};
use crate::error::Result;

const ENTRY_EXTENSION: &str = "json";

#[derive(Debug)]
pub struct FileCache {
    dir: PathBuf,
    max_size: usize,
    counters: CacheCounters,
    /// Serialises capacity checks with inserts within this process.
    write_lock: Mutex<()>,
}

/// Keys become file names; anything outside `[A-Za-z0-9_-]` is replaced.
fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl FileCache {
    /// Create the backend, making sure `dir` exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>, max_size: usize) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            max_size: max_size.max(1),
            counters: CacheCounters::default(),
            write_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{ENTRY_EXTENSION}", file_stem(key)))
    }

    async fn read_entry(path: &Path) -> Option<CachedResponse> {
        let content = tokio::fs::read_to_string(path).await.ok()?;
        match serde_json::from_str(&content) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Discarding corrupt cache entry");
                let _ = tokio::fs::remove_file(path).await;
                None
            }
        }
    }

    /// Temp file in the same directory, then rename over the target.
    async fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let temp_path = parent.join(format!(
            ".{}.tmp.{}",
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("entry"),
            std::process::id()
        ));
        tokio::fs::create_dir_all(parent).await?;
        tokio::fs::write(&temp_path, content).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }
        Ok(())
    }

    async fn write_entry(&self, path: &Path, value: &CachedResponse) {
        let result = match serde_json::to_vec(value) {
            Ok(bytes) => Self::write_atomic(path, &bytes).await,
            Err(e) => Err(std::io::Error::other(e)),
        };
        if let Err(e) = result {
            self.counters.error();
            tracing::warn!(path = %path.display(), error = %e, "Failed to write cache entry");
        }
    }

    /// Paths of every entry file currently in the directory.
    async fn entry_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        let Ok(mut dir) = tokio::fs::read_dir(&self.dir).await else {
            return paths;
        };
        while let Ok(Some(item)) = dir.next_entry().await {
            let path = item.path();
            let is_entry = path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION)
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
            if is_entry {
                paths.push(path);
            }
        }
        paths
    }

    pub async fn get(&self, key: &str) -> Option<CachedResponse> {
        let path = self.path_for(key);
        let Some(mut entry) = Self::read_entry(&path).await else {
            self.counters.miss();
            return None;
        };
        if entry.is_expired_at(Utc::now()) {
            let _ = tokio::fs::remove_file(&path).await;
            self.counters.expired_lookup();
            return None;
        }
        entry.hit_count += 1;
        self.counters.hit();
        self.write_entry(&path, &entry).await;
        Some(entry)
    }

    pub async fn set(&self, key: &str, value: CachedResponse) {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(key);

        if !path.exists() {
            let paths = self.entry_paths().await;
            if paths.len() >= self.max_size {
                let mut oldest: Option<(PathBuf, chrono::DateTime<Utc>)> = None;
                for candidate in paths {
                    let Some(entry) = Self::read_entry(&candidate).await else {
                        continue;
                    };
                    if oldest.as_ref().is_none_or(|(_, at)| entry.created_at < *at) {
                        oldest = Some((candidate, entry.created_at));
                    }
                }
                if let Some((victim, _)) = oldest
                    && tokio::fs::remove_file(&victim).await.is_ok()
                {
                    self.counters.eviction();
                    tracing::debug!(path = %victim.display(), "Evicted oldest cache entry");
                }
            }
        }

        self.write_entry(&path, &value).await;
    }

    pub async fn delete(&self, key: &str) -> bool {
        tokio::fs::remove_file(self.path_for(key)).await.is_ok()
    }

    pub async fn clear(&self) {
        let _guard = self.write_lock.lock().await;
        for path in self.entry_paths().await {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                self.counters.error();
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove cache entry");
            }
        }
        self.counters.reset();
    }

    pub async fn stats(&self) -> CacheStats {
        let size = self.entry_paths().await.len();
        self.counters.snapshot(size)
    }

    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut purged = 0;
        for path in self.entry_paths().await {
            let Some(entry) = Self::read_entry(&path).await else {
                continue;
            };
            if entry.is_expired_at(now) && tokio::fs::remove_file(&path).await.is_ok() {
                self.counters.expiration();
                purged += 1;
            }
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_stem_keeps_hex_and_replaces_separators() {
        assert_eq!(file_stem("abc123"), "abc123");
        assert_eq!(file_stem("persona:../x"), "persona____x");
    }
}
