//! Persisted document model, settings, and the document storage seam.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::blocks::DEFAULT_DELIMITER;
use crate::scheduler::SchedulerConfig;
use crate::store::StoreSnapshot;

/// Current settings schema version.
pub const SETTINGS_VERSION: u32 = 2;

/// User-facing configuration, persisted in the document's `settings` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Schema version; documents written before versioning load as 0
    #[serde(default)]
    pub version: u32,
    pub delimiter: char,
    pub scheduler: SchedulerConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            delimiter: DEFAULT_DELIMITER,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Settings {
    /// Versioned migration, applied exactly once at load. Each step upgrades
    /// one version; there are no fill-in-missing-key checks anywhere else.
    pub fn migrate(&mut self) -> bool {
        let from = self.version;
        while self.version < SETTINGS_VERSION {
            match self.version {
                // v1 introduced the relearning step ladder
                0 => {
                    if self.scheduler.relearning_steps_minutes.is_empty() {
                        self.scheduler.relearning_steps_minutes =
                            SchedulerConfig::default().relearning_steps_minutes;
                    }
                }
                // v2 bounded the retention target
                1 => {
                    self.scheduler.desired_retention =
                        self.scheduler.desired_retention.clamp(0.5, 0.99);
                }
                _ => {}
            }
            self.version += 1;
        }
        if from != self.version {
            log::info!("Migrated settings from version {} to {}", from, self.version);
            true
        } else {
            false
        }
    }
}

/// The single structured file: `settings` plus the `store` aggregate.
///
/// `store` is optional so a document written without one (or truncated) is
/// detected rather than silently treated as data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedDocument {
    pub settings: Settings,
    pub store: Option<StoreSnapshot>,
}

/// Host primitive for the persisted document: load/save, a last-modified
/// query for external-writer detection, and a best-effort backup hook.
pub trait DocumentStore {
    /// `None` when no document exists yet (first run).
    fn load(&self) -> io::Result<Option<String>>;
    fn save(&self, contents: &str) -> io::Result<()>;
    fn modified_time(&self) -> io::Result<Option<SystemTime>>;
    /// Copy the current on-disk document aside under `tag`. Returns false
    /// when there is nothing to back up.
    fn write_backup(&self, tag: &str) -> io::Result<bool>;
}

/// Default: keep the last N dated backups
const MAX_BACKUPS: usize = 10;

/// Filesystem-backed document store; backups live in a `backups/` directory
/// next to the document.
pub struct FsDocumentStore {
    path: PathBuf,
    backups_dir: PathBuf,
}

impl FsDocumentStore {
    pub fn new(path: PathBuf) -> Self {
        let backups_dir = path
            .parent()
            .map(|p| p.join("backups"))
            .unwrap_or_else(|| PathBuf::from("backups"));
        Self { path, backups_dir }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn prune_backups(&self) -> io::Result<()> {
        let mut backups: Vec<PathBuf> = fs::read_dir(&self.backups_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map_or(false, |e| e == "json"))
            .collect();
        // Dated names sort chronologically
        backups.sort();
        while backups.len() > MAX_BACKUPS {
            let oldest = backups.remove(0);
            fs::remove_file(&oldest)?;
        }
        Ok(())
    }
}

impl DocumentStore for FsDocumentStore {
    fn load(&self) -> io::Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&self.path).map(Some)
    }

    fn save(&self, contents: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, contents)
    }

    fn modified_time(&self) -> io::Result<Option<SystemTime>> {
        if !self.path.exists() {
            return Ok(None);
        }
        fs::metadata(&self.path)?.modified().map(Some)
    }

    fn write_backup(&self, tag: &str) -> io::Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        fs::create_dir_all(&self.backups_dir)?;
        let target = self.backups_dir.join(format!("sprout-{}.json", tag));
        fs::copy(&self.path, &target)?;
        self.prune_backups()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_v0_fills_relearning_steps_and_clamps() {
        let json = r#"{"delimiter":"|","scheduler":{"relearningStepsMinutes":[],"desiredRetention":0.2}}"#;
        let mut settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.version, 0);
        assert!(settings.migrate());
        assert_eq!(settings.version, SETTINGS_VERSION);
        assert!(!settings.scheduler.relearning_steps_minutes.is_empty());
        assert!(settings.scheduler.desired_retention >= 0.5);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let mut settings = Settings::default();
        assert!(!settings.migrate());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_document_without_store_section() {
        let doc: PersistedDocument = serde_json::from_str(r#"{"settings":{}}"#).unwrap();
        assert!(doc.store.is_none());
    }

    #[test]
    fn test_fs_store_roundtrip_and_backup_pruning() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path().join("sprout.json"));

        assert!(store.load().unwrap().is_none());
        assert!(store.modified_time().unwrap().is_none());
        assert!(!store.write_backup("20260101_000000").unwrap());

        store.save("{\"settings\":{}}").unwrap();
        assert!(store.load().unwrap().is_some());
        assert!(store.modified_time().unwrap().is_some());

        for i in 0..(MAX_BACKUPS + 3) {
            assert!(store.write_backup(&format!("20260101_{:06}", i)).unwrap());
        }
        let count = fs::read_dir(dir.path().join("backups")).unwrap().count();
        assert_eq!(count, MAX_BACKUPS);
    }
}
