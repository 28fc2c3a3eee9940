// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable per-store sync state.
//!
//! The [`StateStore`] owns the on-disk files recording what the marketplace
//! last acknowledged per SKU. At most one writer per store id is permitted;
//! the scheduler enforces this by running stores sequentially.
//!
//! Load semantics are correctness-critical:
//!
//! - An **absent** primary file means "no state": the engine must treat the
//!   next run as a full sync. Backups are NOT consulted — deleting the
//!   primary is the documented way to force a full resync, and silently
//!   resurrecting a backup would defeat it.
//! - A **present but corrupt** primary falls back to the backup, because a
//!   crash mid-write is recoverable and a full-state re-diff from backup is
//!   strictly better than a multi-hour force-full push.
//!
//! Save failures never propagate: the previous file stays intact and the
//! next run simply re-diffs from the old state.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::config::WriteMode;
use crate::model::{CheckpointRecord, StateMap, WorkerProgress};

/// How many times a transient rename failure is retried before degrading
/// to copy+delete.
const RENAME_RETRIES: u32 = 3;
const RENAME_RETRY_BACKOFF_MS: u64 = 50;

/// Durable store for per-store SKU state, checkpoints and worker progress.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
    mode: WriteMode,
}

impl StateStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, mode: WriteMode) -> Self {
        Self { dir: dir.into(), mode }
    }

    #[must_use]
    pub fn state_path(&self, store_id: u32) -> PathBuf {
        self.dir.join(format!(".state-store-{store_id}.json"))
    }

    fn backup_path(&self, store_id: u32) -> PathBuf {
        self.dir.join(format!(".state-store-{store_id}.json.bak"))
    }

    fn checkpoint_path(&self, store_id: u32) -> PathBuf {
        self.dir.join(format!(".checkpoint-store-{store_id}.json"))
    }

    fn progress_path(&self, store_id: u32) -> PathBuf {
        self.dir.join(format!(".bg-worker-progress-{store_id}.json"))
    }

    /// Load the state map for a store. Never fails; degradations are
    /// logged and resolved per the protocol above.
    pub fn load(&self, store_id: u32) -> StateMap {
        let primary = self.state_path(store_id);

        let raw = match std::fs::read_to_string(&primary) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(store_id, "No state file, starting empty");
                return StateMap::new();
            }
            Err(e) => {
                // Unreadable is as bad as unparseable: try the backup.
                warn!(store_id, error = %e, "State file unreadable, trying backup");
                return self.load_backup(store_id);
            }
        };

        match parse_state(&raw) {
            Ok(map) => map,
            Err(e) => {
                warn!(store_id, error = %e, "State file corrupt, trying backup");
                self.load_backup(store_id)
            }
        }
    }

    fn load_backup(&self, store_id: u32) -> StateMap {
        let backup = self.backup_path(store_id);
        match std::fs::read_to_string(&backup) {
            Ok(raw) => match parse_state(&raw) {
                Ok(map) => {
                    warn!(store_id, entries = map.len(), "Recovered state from backup");
                    map
                }
                Err(e) => {
                    error!(store_id, error = %e, "Backup also corrupt, starting empty");
                    StateMap::new()
                }
            },
            Err(e) => {
                error!(store_id, error = %e, "No usable backup, starting empty");
                StateMap::new()
            }
        }
    }

    /// Persist the state map. Crash-atomic in [`WriteMode::Atomic`]:
    /// write a temp sibling, back up the prior primary, rename-replace.
    /// Failures are logged and swallowed; the previous file stays intact.
    pub fn save(&self, store_id: u32, map: &StateMap) {
        let payload = match serde_json::to_string(map) {
            Ok(p) => p,
            Err(e) => {
                error!(store_id, error = %e, "Failed to serialize state");
                crate::metrics::record_state_save(store_id, "error");
                return;
            }
        };

        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            error!(store_id, error = %e, "Failed to create state directory");
            crate::metrics::record_state_save(store_id, "error");
            return;
        }

        let primary = self.state_path(store_id);

        // Preserve the previous good state before touching anything.
        if primary.exists() {
            if let Err(e) = std::fs::copy(&primary, self.backup_path(store_id)) {
                warn!(store_id, error = %e, "Failed to write state backup");
            }
        }

        let result = match self.mode {
            WriteMode::Direct => std::fs::write(&primary, &payload),
            WriteMode::Atomic => write_atomic(&primary, &payload),
        };

        match result {
            Ok(()) => {
                debug!(store_id, entries = map.len(), "State saved");
                crate::metrics::record_state_save(store_id, "success");
            }
            Err(e) => {
                error!(store_id, error = %e, "Failed to save state; previous file kept");
                crate::metrics::record_state_save(store_id, "error");
            }
        }
    }

    #[must_use]
    pub fn exists(&self, store_id: u32) -> bool {
        self.state_path(store_id).exists()
    }

    /// Remove the primary and backup. The next run becomes force-full.
    pub fn delete(&self, store_id: u32) {
        for path in [self.state_path(store_id), self.backup_path(store_id)] {
            match std::fs::remove_file(&path) {
                Ok(()) => info!(store_id, path = %path.display(), "State file removed"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(store_id, error = %e, "Failed to remove state file"),
            }
        }
    }

    /// Load the mid-run batch checkpoint, if one was left behind.
    #[must_use]
    pub fn load_checkpoint(&self, store_id: u32) -> Option<CheckpointRecord> {
        let raw = std::fs::read_to_string(self.checkpoint_path(store_id)).ok()?;
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(store_id, error = %e, "Corrupt checkpoint, ignoring");
                None
            }
        }
    }

    /// Persist batch progress. No backup; a lost checkpoint only costs
    /// re-pushing already-confirmed batches.
    pub fn save_checkpoint(&self, store_id: u32, record: &CheckpointRecord) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            warn!(store_id, error = %e, "Failed to create state directory");
            return;
        }
        let payload = match serde_json::to_string(record) {
            Ok(p) => p,
            Err(e) => {
                warn!(store_id, error = %e, "Failed to serialize checkpoint");
                return;
            }
        };
        let path = self.checkpoint_path(store_id);
        let result = match self.mode {
            WriteMode::Direct => std::fs::write(&path, &payload),
            WriteMode::Atomic => write_atomic(&path, &payload),
        };
        if let Err(e) = result {
            warn!(store_id, error = %e, "Failed to save checkpoint");
        }
    }

    pub fn clear_checkpoint(&self, store_id: u32) {
        match std::fs::remove_file(self.checkpoint_path(store_id)) {
            Ok(()) | Err(_) => {}
        }
    }

    /// Write the background-worker progress file.
    pub fn save_progress(&self, store_id: u32, progress: &WorkerProgress) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            warn!(store_id, error = %e, "Failed to create state directory");
            return;
        }
        let payload = match serde_json::to_string_pretty(progress) {
            Ok(p) => p,
            Err(e) => {
                warn!(store_id, error = %e, "Failed to serialize worker progress");
                return;
            }
        };
        if let Err(e) = std::fs::write(self.progress_path(store_id), payload) {
            warn!(store_id, error = %e, "Failed to save worker progress");
        }
    }

    #[must_use]
    pub fn load_progress(&self, store_id: u32) -> Option<WorkerProgress> {
        let raw = std::fs::read_to_string(self.progress_path(store_id)).ok()?;
        serde_json::from_str(&raw).ok()
    }
}

/// Parse and schema-validate a state file. Typed deserialization rejects
/// wrong shapes; the explicit pass rejects non-finite numbers (a number
/// overflowing f64 parses as infinity).
fn parse_state(raw: &str) -> Result<StateMap, String> {
    let map: StateMap = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    for (sku, entry) in &map {
        if !entry.price.is_finite() {
            return Err(format!("entry '{sku}' has non-finite price"));
        }
    }
    Ok(map)
}

/// Write via temp sibling + rename. Transient rename failures (locked or
/// permission-gated targets on some hosts) are retried, then degraded to
/// copy+delete.
fn write_atomic(target: &Path, payload: &str) -> io::Result<()> {
    let tmp = target.with_extension("json.tmp");
    std::fs::write(&tmp, payload)?;

    let mut last_err: Option<io::Error> = None;
    for attempt in 0..RENAME_RETRIES {
        match std::fs::rename(&tmp, target) {
            Ok(()) => return Ok(()),
            Err(e) if is_transient(&e) => {
                debug!(attempt, error = %e, "Transient rename failure, retrying");
                std::thread::sleep(std::time::Duration::from_millis(
                    RENAME_RETRY_BACKOFF_MS * (attempt as u64 + 1),
                ));
                last_err = Some(e);
            }
            Err(e) => {
                let _ = std::fs::remove_file(&tmp);
                return Err(e);
            }
        }
    }

    // Rename keeps failing; fall back to a non-atomic copy so the write
    // still lands. The temp file holds the full payload.
    warn!(target = %target.display(), "Rename kept failing, degrading to copy+delete");
    let result = std::fs::copy(&tmp, target).map(|_| ());
    let _ = std::fs::remove_file(&tmp);
    result.map_err(|copy_err| last_err.unwrap_or(copy_err))
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::WouldBlock | io::ErrorKind::Other
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{now_millis, StateEntry};
    use tempfile::TempDir;

    fn entry(quantity: u32, enabled: bool, price: f64) -> StateEntry {
        StateEntry {
            quantity,
            enabled,
            price,
            last_seen: now_millis(),
            synced_to_marketplace: false,
        }
    }

    fn sample_map() -> StateMap {
        let mut map = StateMap::new();
        map.insert("A".into(), entry(10, true, 100.0));
        map.insert("B".into(), entry(0, false, 25.5));
        map
    }

    #[test]
    fn test_load_absent_returns_empty() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), WriteMode::Atomic);
        assert!(store.load(1).is_empty());
        assert!(!store.exists(1));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), WriteMode::Atomic);

        let map = sample_map();
        store.save(1, &map);
        assert!(store.exists(1));
        assert_eq!(store.load(1), map);
    }

    #[test]
    fn test_direct_mode_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), WriteMode::Direct);

        let map = sample_map();
        store.save(1, &map);
        assert_eq!(store.load(1), map);
    }

    #[test]
    fn test_corrupt_primary_recovers_from_backup() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), WriteMode::Atomic);

        let map = sample_map();
        store.save(1, &map);
        // Second save creates the backup of the first good file.
        store.save(1, &map);

        std::fs::write(store.state_path(1), "{broken").unwrap();
        assert_eq!(store.load(1), map);
    }

    #[test]
    fn test_corrupt_primary_and_backup_returns_empty() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), WriteMode::Atomic);

        store.save(1, &sample_map());
        store.save(1, &sample_map());
        std::fs::write(store.state_path(1), "{broken").unwrap();
        std::fs::write(dir.path().join(".state-store-1.json.bak"), "also broken").unwrap();

        assert!(store.load(1).is_empty());
    }

    #[test]
    fn test_absent_primary_ignores_backup() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), WriteMode::Atomic);

        store.save(1, &sample_map());
        store.save(1, &sample_map());
        std::fs::remove_file(store.state_path(1)).unwrap();

        // Deleting the primary is the documented force-full trigger; the
        // backup must not resurrect state.
        assert!(store.load(1).is_empty());
    }

    #[test]
    fn test_schema_validation_rejects_bad_entries() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), WriteMode::Atomic);

        // Wrong type for quantity.
        std::fs::write(
            store.state_path(1),
            r#"{"A": {"quantity": "many", "enabled": true, "price": 1.0, "last_seen": 0}}"#,
        )
        .unwrap();
        assert!(store.load(1).is_empty());

        // Number overflowing f64 becomes infinity: schema-invalid.
        std::fs::write(
            store.state_path(2),
            r#"{"A": {"quantity": 1, "enabled": true, "price": 1e999, "last_seen": 0}}"#,
        )
        .unwrap();
        assert!(store.load(2).is_empty());
    }

    #[test]
    fn test_delete_removes_primary_and_backup() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), WriteMode::Atomic);

        store.save(1, &sample_map());
        store.save(1, &sample_map());
        store.delete(1);

        assert!(!store.exists(1));
        assert!(store.load(1).is_empty());
    }

    #[test]
    fn test_stores_are_isolated() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), WriteMode::Atomic);

        store.save(1, &sample_map());
        assert!(store.load(2).is_empty());
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), WriteMode::Atomic);

        assert!(store.load_checkpoint(1).is_none());

        let record = CheckpointRecord { completed: 3, total: 10, updated_at: now_millis() };
        store.save_checkpoint(1, &record);
        assert_eq!(store.load_checkpoint(1), Some(record));

        store.clear_checkpoint(1);
        assert!(store.load_checkpoint(1).is_none());
    }

    #[test]
    fn test_progress_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), WriteMode::Atomic);

        let progress = WorkerProgress {
            total_items: 1000,
            synced_items: 400,
            remaining_items: 600,
            percent_complete: 40.0,
            estimated_days_remaining: 2.0,
            last_sync_at: now_millis(),
            started_at: now_millis(),
        };
        store.save_progress(7, &progress);

        let loaded = store.load_progress(7).unwrap();
        assert_eq!(loaded.total_items, 1000);
        assert_eq!(loaded.remaining_items, 600);
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), WriteMode::Atomic);

        store.save(1, &sample_map());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
