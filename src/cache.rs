//! Match cache: resolved search queries persisted across runs.
//!
//! Keyed by the composed query string, not by song, so a change in query
//! composition makes stale entries unreachable instead of wrong. Only positive
//! matches are ever stored.

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use crate::models::CatalogMatch;

/// In-memory cache shared by all resolver workers, optionally backed by a JSON file.
#[derive(Debug)]
pub struct MatchCache {
    path: Option<PathBuf>,
    entries: RwLock<FxHashMap<String, CatalogMatch>>,
}

impl MatchCache {
    /// Load the cache file. A missing file is a cold start; an unreadable or
    /// corrupt file is treated the same way, with a warning.
    pub fn load(path: &Path) -> Self {
        let entries = if path.is_file() {
            match read_entries(path) {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("Ignoring unreadable match cache {}: {:#}", path.display(), e);
                    FxHashMap::default()
                }
            }
        } else {
            FxHashMap::default()
        };
        log::info!("Read {} match cache entries from {}", entries.len(), path.display());

        Self {
            path: Some(path.to_path_buf()),
            entries: RwLock::new(entries),
        }
    }

    /// A cache that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn get(&self, query: &str) -> Option<CatalogMatch> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(query)
            .cloned()
    }

    pub fn put(&self, query: &str, found: CatalogMatch) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(query.to_string(), found);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write all entries to the backing file. The file is replaced atomically.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        // Sorted keys keep the file diffable between runs
        let sorted: BTreeMap<String, CatalogMatch> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&sorted)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json)
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        if let Err(e) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e).with_context(|| format!("Failed to replace {}", path.display()));
        }

        log::info!("Wrote {} match cache entries to {}", sorted.len(), path.display());
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<FxHashMap<String, CatalogMatch>> {
    let data = fs::read_to_string(path)?;
    let entries: BTreeMap<String, CatalogMatch> = serde_json::from_str(&data)?;
    Ok(entries.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Song;

    fn found(uri: &str) -> CatalogMatch {
        CatalogMatch {
            song: Song::new("Abba", "Waterloo"),
            track_uri: uri.to_string(),
        }
    }

    #[test]
    fn test_get_put() {
        let cache = MatchCache::in_memory();
        assert!(cache.get("artist:abba track:waterloo").is_none());
        cache.put("artist:abba track:waterloo", found("spotify:track:1"));
        assert_eq!(cache.get("artist:abba track:waterloo"), Some(found("spotify:track:1")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_flush_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playlist-cache.json");

        let cache = MatchCache::load(&path);
        assert!(cache.is_empty());
        cache.put("artist:abba track:waterloo", found("spotify:track:1"));
        cache.flush().unwrap();

        let reloaded = MatchCache::load(&path);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("artist:abba track:waterloo"), Some(found("spotify:track:1")));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playlist-cache.json");
        std::fs::write(&path, "{ not json").unwrap();

        let cache = MatchCache::load(&path);
        assert!(cache.is_empty());
        cache.put("q", found("spotify:track:2"));
        cache.flush().unwrap();
        assert_eq!(MatchCache::load(&path).len(), 1);
    }

    #[test]
    fn test_concurrent_puts_are_kept() {
        let cache = MatchCache::in_memory();
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let cache = &cache;
                scope.spawn(move || {
                    for i in 0..25 {
                        cache.put(&format!("q{}-{}", worker, i), found("spotify:track:3"));
                    }
                });
            }
        });
        assert_eq!(cache.len(), 100);
    }
}
