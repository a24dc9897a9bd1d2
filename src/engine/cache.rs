//! Known-good cache and failure fallback.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::engine::merge::write_atomic;
use crate::manager::Manager;
use crate::observability::metrics;

/// Local path → last committed bytes.
pub type CacheEntry = BTreeMap<PathBuf, Vec<u8>>;

/// What a failed pass did to the manager's local files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackAction {
    /// Cached known-good files were written back.
    Restored,
    /// No cache entry; owned files were deleted.
    Cleaned,
    /// No cache entry; files were left as they were.
    Left,
}

impl FallbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackAction::Restored => "restored",
            FallbackAction::Cleaned => "cleaned",
            FallbackAction::Left => "left",
        }
    }
}

impl fmt::Display for FallbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On-disk form of a cache entry; contents are base64 so any bytes survive JSON.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MirrorFile {
    files: BTreeMap<PathBuf, String>,
}

/// Per-manager snapshots of the last fully successful commit.
#[derive(Debug, Clone, Default)]
pub struct KnownGoodCache {
    inner: Arc<DashMap<String, CacheEntry>>,
}

fn mirror_path(dir: &Path, manager: &str) -> PathBuf {
    dir.join(format!("{manager}.json"))
}

fn write_mirror(path: &Path, mirror: &MirrorFile) -> std::io::Result<()> {
    write_atomic(path, &serde_json::to_vec(mirror)?)
}

impl KnownGoodCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, manager: &str) -> Option<CacheEntry> {
        self.inner.get(manager).map(|r| r.value().clone())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Read a manager's mirrored entry from disk, if any.
    pub fn load(&self, manager: &Manager) -> std::io::Result<bool> {
        let Some(dir) = &manager.cache_path else {
            return Ok(false);
        };
        let path = mirror_path(dir, &manager.name);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };

        let mirror: MirrorFile = serde_json::from_slice(&raw)?;
        let mut entry = CacheEntry::new();
        for (file, encoded) in mirror.files {
            let bytes = STANDARD
                .decode(encoded)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            entry.insert(file, bytes);
        }

        tracing::info!(manager = %manager.name, files = entry.len(), "Loaded known-good cache from disk");
        self.inner.insert(manager.name.clone(), entry);
        Ok(true)
    }

    /// Record the manager's current on-disk files as known-good.
    ///
    /// The in-memory entry is replaced before the disk mirror is written; a
    /// mirror failure is logged and never rolls the entry back.
    pub fn snapshot(&self, manager: &Manager) -> std::io::Result<()> {
        let mut entry = CacheEntry::new();
        for path in manager.local_files() {
            match std::fs::read(&path) {
                Ok(bytes) => {
                    entry.insert(path, bytes);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!(manager = %manager.name, path = %path.display(), "Committed file missing at snapshot");
                }
                Err(e) => return Err(e),
            }
        }

        let mirror = manager.cache_path.as_ref().map(|dir| {
            (
                mirror_path(dir, &manager.name),
                MirrorFile {
                    files: entry.iter().map(|(p, b)| (p.clone(), STANDARD.encode(b))).collect(),
                },
            )
        });

        tracing::debug!(manager = %manager.name, files = entry.len(), "Known-good cache updated");
        self.inner.insert(manager.name.clone(), entry);
        metrics::record_cache_snapshot(&manager.name);

        if let Some((path, mirror)) = mirror {
            if let Err(e) = write_mirror(&path, &mirror) {
                tracing::error!(
                    manager = %manager.name,
                    path = %path.display(),
                    error = %e,
                    "Failed to mirror known-good cache to disk, keeping in-memory entry"
                );
            }
        }
        Ok(())
    }

    /// Apply the failure policy: restore, else clean, else leave.
    pub fn fallback(&self, manager: &Manager) -> FallbackAction {
        let cached = if manager.enable_cache {
            if !self.inner.contains_key(&manager.name) {
                if let Err(e) = self.load(manager) {
                    tracing::warn!(manager = %manager.name, error = %e, "Failed to read known-good cache mirror");
                }
            }
            self.get(&manager.name)
        } else {
            None
        };

        let action = match cached {
            Some(entry) => {
                for (path, content) in &entry {
                    match write_atomic(path, content) {
                        Ok(()) => tracing::info!(manager = %manager.name, path = %path.display(), "Restored known-good file"),
                        Err(e) => tracing::error!(
                            manager = %manager.name,
                            path = %path.display(),
                            error = %e,
                            "Failed to restore known-good file"
                        ),
                    }
                }
                FallbackAction::Restored
            }
            None if manager.clean_files => {
                for path in manager.local_files() {
                    match std::fs::remove_file(&path) {
                        Ok(()) => tracing::warn!(manager = %manager.name, path = %path.display(), "Removed broken config file"),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => tracing::error!(
                            manager = %manager.name,
                            path = %path.display(),
                            error = %e,
                            "Failed to remove config file"
                        ),
                    }
                }
                FallbackAction::Cleaned
            }
            None => FallbackAction::Left,
        };

        metrics::record_cache_restore(&manager.name, action.as_str());
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GlobalsConfig, ManagerConfig, RepoConfig};

    fn manager(dest: &Path, enable_cache: bool, clean_files: bool, cache_path: Option<&Path>) -> Manager {
        let config = ManagerConfig {
            name: "m".to_string(),
            dest_path: dest.display().to_string(),
            primary_config_name: "p.yml".to_string(),
            enable_cache,
            clean_files,
            cache_path: cache_path.map(|p| p.display().to_string()),
            repos: vec![RepoConfig {
                name: "r".to_string(),
                method: "file".to_string(),
                repo_path: "/src".to_string(),
                primary_config: vec!["a.yml".to_string()],
                additional_config: vec!["x.yml".to_string()],
                content_type: None,
            }],
            ..Default::default()
        };
        Manager::from_config(&config, &GlobalsConfig::default()).unwrap()
    }

    #[test]
    fn test_snapshot_then_restore() {
        let dest = tempfile::tempdir().unwrap();
        let manager = manager(dest.path(), true, false, None);
        let primary = dest.path().join("p.yml");
        std::fs::write(&primary, "X").unwrap();

        let cache = KnownGoodCache::new();
        cache.snapshot(&manager).unwrap();
        assert_eq!(cache.get("m").unwrap().len(), 1);

        std::fs::write(&primary, "broken").unwrap();
        assert_eq!(cache.fallback(&manager), FallbackAction::Restored);
        assert_eq!(std::fs::read_to_string(&primary).unwrap(), "X");
    }

    #[test]
    fn test_clean_without_cache() {
        let dest = tempfile::tempdir().unwrap();
        let manager = manager(dest.path(), false, true, None);
        std::fs::write(dest.path().join("p.yml"), "stale").unwrap();

        let cache = KnownGoodCache::new();
        assert_eq!(cache.fallback(&manager), FallbackAction::Cleaned);
        assert!(!dest.path().join("p.yml").exists());
    }

    #[test]
    fn test_leave_without_cache() {
        let dest = tempfile::tempdir().unwrap();
        let manager = manager(dest.path(), true, false, None);
        std::fs::write(dest.path().join("p.yml"), "stale").unwrap();

        assert_eq!(KnownGoodCache::new().fallback(&manager), FallbackAction::Left);
        assert_eq!(std::fs::read_to_string(dest.path().join("p.yml")).unwrap(), "stale");
    }

    #[test]
    fn test_mirror_survives_new_cache() {
        let dest = tempfile::tempdir().unwrap();
        let mirror = tempfile::tempdir().unwrap();
        let manager = manager(dest.path(), true, false, Some(mirror.path()));
        let primary = dest.path().join("p.yml");
        std::fs::write(&primary, "good").unwrap();

        KnownGoodCache::new().snapshot(&manager).unwrap();
        std::fs::write(&primary, "bad").unwrap();

        let fresh = KnownGoodCache::new();
        assert_eq!(fresh.fallback(&manager), FallbackAction::Restored);
        assert_eq!(std::fs::read_to_string(&primary).unwrap(), "good");
    }

    #[test]
    fn test_mirror_write_failure_keeps_latest_entry() {
        let dest = tempfile::tempdir().unwrap();
        let mirror = tempfile::tempdir().unwrap();
        let manager = manager(dest.path(), true, false, Some(mirror.path()));
        let primary = dest.path().join("p.yml");
        let cache = KnownGoodCache::new();

        std::fs::write(&primary, "A").unwrap();
        cache.snapshot(&manager).unwrap();

        // A directory in place of the mirror file makes the rename fail.
        let blocked = mirror.path().join("m.json");
        std::fs::remove_file(&blocked).unwrap();
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("keep"), "x").unwrap();

        std::fs::write(&primary, "B").unwrap();
        cache.snapshot(&manager).unwrap();
        assert!(blocked.is_dir());

        std::fs::write(&primary, "broken").unwrap();
        assert_eq!(cache.fallback(&manager), FallbackAction::Restored);
        assert_eq!(std::fs::read_to_string(&primary).unwrap(), "B");
    }
}
