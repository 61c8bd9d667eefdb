//! Durable registry of watched handles.
//!
//! One registry file per watch direction. Every mutation follows
//! persist-then-acknowledge: a clone of the in-memory map is mutated and
//! written atomically before the shared state is swapped, so a crash can
//! lose an in-flight mutation but never corrupt the file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::Result;
use crate::utils::fs::{atomic_write_json, load_json};
use crate::watch::WatchDirection;

/// One watched handle's durable record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEntry {
    /// Notification target (channel, chat, or webhook route id).
    pub target: String,
    /// When the watch began, UTC.
    pub started_at: DateTime<Utc>,
    /// Actor who requested the watch.
    pub requested_by: String,
}

impl WatchEntry {
    pub fn new(
        target: impl Into<String>,
        requested_by: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            started_at: Utc::now(),
            requested_by: requested_by.into(),
        }
    }

    /// Seconds elapsed since the watch began.
    pub fn elapsed_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}

/// Durable handle-to-entry map for one watch direction.
pub struct WatchRegistry {
    path: PathBuf,
    direction: WatchDirection,
    entries: RwLock<HashMap<String, WatchEntry>>,
}

impl WatchRegistry {
    /// Open the registry backing file for `direction`. An absent file
    /// yields an empty registry; a corrupt file is an error.
    pub fn open(path: impl AsRef<Path>, direction: WatchDirection) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = match load_json::<HashMap<String, WatchEntry>>(&path)? {
            Some(entries) => {
                info!(
                    direction = %direction,
                    count = entries.len(),
                    "Loaded watch registry"
                );
                entries
            }
            None => {
                warn!(direction = %direction, path = %path.display(), "Registry file not found, starting empty");
                HashMap::new()
            }
        };

        Ok(Self {
            path,
            direction,
            entries: RwLock::new(entries),
        })
    }

    pub fn direction(&self) -> WatchDirection {
        self.direction
    }

    /// Record a watch. Returns `false` without persisting when the handle
    /// is already present.
    pub fn add(&self, handle: &str, entry: WatchEntry) -> Result<bool> {
        let mut entries = self.entries.write();
        if entries.contains_key(handle) {
            return Ok(false);
        }

        let mut updated = entries.clone();
        updated.insert(handle.to_string(), entry);
        atomic_write_json(&self.path, &updated)?;
        *entries = updated;

        info!(handle, direction = %self.direction, "Registered watch");
        Ok(true)
    }

    /// Drop a watch. Returns `false` when the handle was not present.
    pub fn remove(&self, handle: &str) -> Result<bool> {
        let mut entries = self.entries.write();
        if !entries.contains_key(handle) {
            return Ok(false);
        }

        let mut updated = entries.clone();
        updated.remove(handle);
        atomic_write_json(&self.path, &updated)?;
        *entries = updated;

        info!(handle, direction = %self.direction, "Unregistered watch");
        Ok(true)
    }

    /// Drop every watch. Returns the handles removed.
    pub fn clear(&self) -> Result<Vec<String>> {
        let mut entries = self.entries.write();
        let removed: Vec<String> = entries.keys().cloned().collect();
        if removed.is_empty() {
            return Ok(removed);
        }

        atomic_write_json(&self.path, &HashMap::<String, WatchEntry>::new())?;
        entries.clear();

        info!(count = removed.len(), direction = %self.direction, "Cleared watch registry");
        Ok(removed)
    }

    pub fn get(&self, handle: &str) -> Option<WatchEntry> {
        self.entries.read().get(handle).cloned()
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.entries.read().contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of all entries, sorted by handle for stable listings.
    pub fn entries(&self) -> Vec<(String, WatchEntry)> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, WatchRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = WatchRegistry::open(
            dir.path().join("ban_watch.json"),
            WatchDirection::AwaitingBan,
        )
        .unwrap();
        (dir, registry)
    }

    #[test]
    fn test_add_and_get() {
        let (_dir, registry) = registry();
        assert!(registry.add("alice", WatchEntry::new("chan-1", "42")).unwrap());
        let entry = registry.get("alice").unwrap();
        assert_eq!(entry.target, "chan-1");
        assert_eq!(entry.requested_by, "42");
        assert!(registry.contains("alice"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_add_duplicate_is_rejected() {
        let (_dir, registry) = registry();
        assert!(registry.add("alice", WatchEntry::new("chan-1", "42")).unwrap());
        assert!(!registry.add("alice", WatchEntry::new("chan-2", "7")).unwrap());
        // Original entry untouched.
        assert_eq!(registry.get("alice").unwrap().target, "chan-1");
    }

    #[test]
    fn test_remove() {
        let (_dir, registry) = registry();
        registry.add("alice", WatchEntry::new("chan-1", "42")).unwrap();
        assert!(registry.remove("alice").unwrap());
        assert!(!registry.remove("alice").unwrap());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear_returns_removed_handles() {
        let (_dir, registry) = registry();
        registry.add("alice", WatchEntry::new("c", "u")).unwrap();
        registry.add("bob", WatchEntry::new("c", "u")).unwrap();
        let mut removed = registry.clear().unwrap();
        removed.sort();
        assert_eq!(removed, vec!["alice".to_string(), "bob".to_string()]);
        assert!(registry.is_empty());
        assert!(registry.clear().unwrap().is_empty());
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recovery_watch.json");
        let started_at;
        {
            let registry =
                WatchRegistry::open(&path, WatchDirection::AwaitingRecovery).unwrap();
            registry.add("alice", WatchEntry::new("chan-9", "42")).unwrap();
            started_at = registry.get("alice").unwrap().started_at;
        }

        let registry = WatchRegistry::open(&path, WatchDirection::AwaitingRecovery).unwrap();
        assert_eq!(registry.len(), 1);
        let entry = registry.get("alice").unwrap();
        assert_eq!(entry.target, "chan-9");
        assert_eq!(entry.started_at, started_at);
    }

    #[test]
    fn test_entries_sorted() {
        let (_dir, registry) = registry();
        registry.add("zoe", WatchEntry::new("c", "u")).unwrap();
        registry.add("alice", WatchEntry::new("c", "u")).unwrap();
        let handles: Vec<_> = registry.entries().into_iter().map(|(h, _)| h).collect();
        assert_eq!(handles, vec!["alice", "zoe"]);
    }

    #[test]
    fn test_open_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ban_watch.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(WatchRegistry::open(&path, WatchDirection::AwaitingBan).is_err());
    }
}
