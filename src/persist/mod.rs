//! Persistence gatekeeper.
//!
//! Saving is a multi-step read-merge-write that independent events can
//! trigger concurrently; a mutex serializes the sequences. The gatekeeper
//! remembers the document's last-modified time as of the last read or
//! committed write, and re-checks it before committing — a mismatch means
//! an external writer touched the file since we last saw it, so the attempt
//! aborts, the conflicting document is backed up, and the cycle retries
//! against a fresh observation, up to a bound, after which one
//! unconditional write guarantees forward progress. Backups are best-effort
//! and never fail the primary save.

mod document;

use std::sync::Mutex;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use document::{
    DocumentStore, FsDocumentStore, PersistedDocument, Settings, SETTINGS_VERSION,
};

use crate::store::{CardStore, StoreSnapshot};

/// Mtime-conflict retries before the last-resort write.
const MAX_SAVE_ATTEMPTS: usize = 3;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Persist safety refused the write: {0}")]
    SafetyRefused(String),
}

pub type Result<T> = std::result::Result<T, PersistError>;

pub struct Gatekeeper<D: DocumentStore> {
    document: D,
    save_lock: Mutex<()>,
    /// Modified time as of the last load or committed save
    disk_mtime: Mutex<Option<SystemTime>>,
}

impl<D: DocumentStore> Gatekeeper<D> {
    pub fn new(document: D) -> Self {
        Self {
            document,
            save_lock: Mutex::new(()),
            disk_mtime: Mutex::new(None),
        }
    }

    pub fn document(&self) -> &D {
        &self.document
    }

    /// Load settings and store from disk. An absent file is a first run; a
    /// present file without a `store` section is treated as empty (logged),
    /// and the first write after it runs through the safety check as usual.
    pub fn load(&self) -> Result<(Settings, CardStore)> {
        let loaded = self.document.load()?;
        self.set_baseline(self.document.modified_time()?);
        match loaded {
            None => {
                log::info!("No persisted document found; starting with an empty store");
                Ok((Settings::default(), CardStore::new()))
            }
            Some(text) => {
                let mut doc: PersistedDocument = serde_json::from_str(&text)?;
                doc.settings.migrate();
                let snapshot = match doc.store {
                    Some(snapshot) => snapshot,
                    None => {
                        log::warn!(
                            "Persisted document has no store section; treating as empty"
                        );
                        StoreSnapshot::default()
                    }
                };
                Ok((doc.settings, CardStore::from_snapshot(snapshot)))
            }
        }
    }

    /// Persist the store, subject to the store's safety assessment.
    pub fn save(
        &self,
        store: &mut CardStore,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let _guard = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());

        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            let baseline = self.baseline();
            let (json, count) = self.candidate_json(store, settings, now)?;
            if self.document.modified_time()? == baseline {
                return self.commit(store, &json, count);
            }
            log::warn!(
                "Document changed on disk since it was last read (attempt {}/{}); \
                 backing it up and retrying against the current file",
                attempt,
                MAX_SAVE_ATTEMPTS
            );
            // The in-memory store stays authoritative; keep a copy of the
            // external writer's version before overwriting it.
            self.backup_before_risky_save("external edit would be overwritten", now);
            self.set_baseline(self.document.modified_time()?);
        }

        log::warn!(
            "External writes kept interfering across {} attempts; forcing the write",
            MAX_SAVE_ATTEMPTS
        );
        let (json, count) = self.candidate_json(store, settings, now)?;
        self.commit(store, &json, count)
    }

    fn commit(&self, store: &mut CardStore, json: &str, count: usize) -> Result<()> {
        self.document.save(json)?;
        self.set_baseline(self.document.modified_time()?);
        store.note_persisted(count);
        Ok(())
    }

    fn baseline(&self) -> Option<SystemTime> {
        *self.disk_mtime.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_baseline(&self, mtime: Option<SystemTime>) {
        *self.disk_mtime.lock().unwrap_or_else(|e| e.into_inner()) = mtime;
    }

    /// Build and vet one candidate document.
    fn candidate_json(
        &self,
        store: &CardStore,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Result<(String, usize)> {
        let candidate = store.to_snapshot();
        let verdict = store.assess_persist_safety(&candidate);
        if !verdict.allow {
            log::error!("Refusing to persist: {}", verdict.reason);
            return Err(PersistError::SafetyRefused(verdict.reason));
        }
        if verdict.backup_first {
            self.backup_before_risky_save(&verdict.reason, now);
        }
        let count = candidate.cards.len();
        let doc = PersistedDocument {
            settings: settings.clone(),
            store: Some(candidate),
        };
        Ok((serde_json::to_string_pretty(&doc)?, count))
    }

    fn backup_before_risky_save(&self, reason: &str, now: DateTime<Utc>) {
        let tag = now.format("%Y%m%d_%H%M%S").to_string();
        match self.document.write_backup(&tag) {
            Ok(true) => log::info!("Backed up document as {} before risky save: {}", tag, reason),
            Ok(false) => {}
            Err(e) => log::warn!("Backup before risky save failed (continuing): {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, SystemTime};

    use crate::cards::{CardPayload, CardRecord};

    /// In-memory document store whose modified time tracks every write,
    /// like an mtime on a real filesystem.
    #[derive(Default)]
    struct MemDoc {
        contents: Mutex<Option<String>>,
        version: AtomicUsize,
        backups: AtomicUsize,
        mtime_calls: AtomicUsize,
        /// Every Nth mtime query reports a later time (0 = never), as if an
        /// external writer kept touching the file
        drift_every: usize,
        fail_backups: bool,
    }

    impl MemDoc {
        /// A write made behind the gatekeeper's back.
        fn external_write(&self, contents: &str) {
            *self.contents.lock().unwrap() = Some(contents.to_string());
            self.version.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl DocumentStore for MemDoc {
        fn load(&self) -> io::Result<Option<String>> {
            Ok(self.contents.lock().unwrap().clone())
        }

        fn save(&self, contents: &str) -> io::Result<()> {
            *self.contents.lock().unwrap() = Some(contents.to_string());
            self.version.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn modified_time(&self) -> io::Result<Option<SystemTime>> {
            if self.contents.lock().unwrap().is_none() {
                return Ok(None);
            }
            let call = self.mtime_calls.fetch_add(1, Ordering::SeqCst);
            let drift = if self.drift_every > 0 {
                call / self.drift_every
            } else {
                0
            };
            let version = self.version.load(Ordering::SeqCst);
            Ok(Some(
                SystemTime::UNIX_EPOCH + Duration::from_secs((version + drift) as u64),
            ))
        }

        fn write_backup(&self, _tag: &str) -> io::Result<bool> {
            if self.fail_backups {
                return Err(io::Error::other("backup disk full"));
            }
            self.backups.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn card(id: &str) -> CardRecord {
        CardRecord::new(
            id.to_string(),
            "note.md".to_string(),
            CardPayload::Basic {
                question: "q".into(),
                answer: "a".into(),
            },
        )
    }

    fn store_with_cards(n: usize) -> CardStore {
        let mut store = CardStore::new();
        for i in 0..n {
            store.upsert_card(card(&format!("id{}", i)));
        }
        store
    }

    #[test]
    fn test_load_absent_document_is_empty_first_run() {
        let gate = Gatekeeper::new(MemDoc::default());
        let (settings, store) = gate.load().unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(store.card_count(), 0);
    }

    #[test]
    fn test_load_document_without_store_section() {
        let doc = MemDoc::default();
        doc.save(r#"{"settings":{}}"#).unwrap();
        let gate = Gatekeeper::new(doc);
        let (_, store) = gate.load().unwrap();
        assert_eq!(store.card_count(), 0);
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let gate = Gatekeeper::new(MemDoc::default());
        let mut store = store_with_cards(3);
        gate.save(&mut store, &Settings::default(), Utc::now()).unwrap();

        let (_, loaded) = gate.load().unwrap();
        assert_eq!(loaded.card_count(), 3);
        assert!(loaded.get_card("id1").is_some());
    }

    #[test]
    fn test_refused_save_writes_nothing() {
        let gate = Gatekeeper::new(MemDoc::default());
        let mut full = store_with_cards(500);
        gate.save(&mut full, &Settings::default(), Utc::now()).unwrap();

        // Same disk history, but the in-memory store lost everything
        let mut emptied = CardStore::from_snapshot(full.to_snapshot());
        for id in emptied
            .get_all_cards()
            .iter()
            .map(|c| c.id.clone())
            .collect::<Vec<_>>()
        {
            emptied.remove_card(&id);
        }
        let before = gate.document().load().unwrap();
        let err = gate
            .save(&mut emptied, &Settings::default(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, PersistError::SafetyRefused(_)));
        assert_eq!(gate.document().load().unwrap(), before);
    }

    #[test]
    fn test_authorized_bulk_delete_allows_empty_save() {
        let gate = Gatekeeper::new(MemDoc::default());
        let mut store = store_with_cards(500);
        gate.save(&mut store, &Settings::default(), Utc::now()).unwrap();

        let mut emptied = CardStore::from_snapshot(store.to_snapshot());
        for id in emptied
            .get_all_cards()
            .iter()
            .map(|c| c.id.clone())
            .collect::<Vec<_>>()
        {
            emptied.remove_card(&id);
        }
        emptied.authorize_bulk_delete();
        gate.save(&mut emptied, &Settings::default(), Utc::now()).unwrap();
        let (_, loaded) = gate.load().unwrap();
        assert_eq!(loaded.card_count(), 0);
    }

    #[test]
    fn test_large_regression_backs_up_first() {
        let gate = Gatekeeper::new(MemDoc::default());
        let mut store = store_with_cards(100);
        gate.save(&mut store, &Settings::default(), Utc::now()).unwrap();

        for i in 10..100 {
            store.remove_card(&format!("id{}", i));
        }
        gate.save(&mut store, &Settings::default(), Utc::now()).unwrap();
        assert_eq!(gate.document().backups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backup_failure_does_not_fail_save() {
        let doc = MemDoc {
            fail_backups: true,
            ..MemDoc::default()
        };
        let gate = Gatekeeper::new(doc);
        let mut store = store_with_cards(100);
        gate.save(&mut store, &Settings::default(), Utc::now()).unwrap();
        for i in 10..100 {
            store.remove_card(&format!("id{}", i));
        }
        gate.save(&mut store, &Settings::default(), Utc::now()).unwrap();
        let (_, loaded) = gate.load().unwrap();
        assert_eq!(loaded.card_count(), 10);
    }

    #[test]
    fn test_external_write_after_load_is_detected_and_backed_up() {
        let gate = Gatekeeper::new(MemDoc::default());
        let mut store = store_with_cards(20);
        gate.save(&mut store, &Settings::default(), Utc::now()).unwrap();

        let (_, mut loaded) = gate.load().unwrap();
        gate.document()
            .external_write(r#"{"settings":{"delimiter":";"}}"#);
        loaded.upsert_card(card("id20"));
        gate.save(&mut loaded, &Settings::default(), Utc::now()).unwrap();

        // The conflict was caught and the foreign version preserved aside
        assert_eq!(gate.document().backups.load(Ordering::SeqCst), 1);
        let on_disk = gate.document().load().unwrap().unwrap();
        assert!(on_disk.contains("id20"));
    }

    #[test]
    fn test_undisturbed_save_never_conflicts() {
        let gate = Gatekeeper::new(MemDoc::default());
        let mut store = store_with_cards(5);
        gate.save(&mut store, &Settings::default(), Utc::now()).unwrap();
        store.upsert_card(card("id5"));
        gate.save(&mut store, &Settings::default(), Utc::now()).unwrap();
        assert_eq!(gate.document().backups.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_constant_mtime_drift_falls_back_to_forced_write() {
        let doc = MemDoc {
            drift_every: 1, // every query reports a later time
            ..MemDoc::default()
        };
        let gate = Gatekeeper::new(doc);
        let mut store = store_with_cards(5);
        gate.save(&mut store, &Settings::default(), Utc::now()).unwrap();

        // Every retry sees a newer mtime, so this save exhausts its
        // attempts and lands via the unconditional write.
        store.upsert_card(card("id5"));
        gate.save(&mut store, &Settings::default(), Utc::now()).unwrap();
        let (_, loaded) = gate.load().unwrap();
        assert_eq!(loaded.card_count(), 6);
    }
}
