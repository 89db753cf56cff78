//! Reconciliation of note content into the card store.
//!
//! A pass walks every anchored block in scope, classifies it as
//! added/updated/quarantined/no-op against the store, then removes cards
//! whose anchors disappeared. Per-block parse problems never abort a pass;
//! file read/write failures do.

mod vault;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use vault::{FsNoteVault, MemoryVault, NoteVault};

use crate::blocks::{self, BlockSyntax};
use crate::cards::{CardPayload, CardRecord, SyncReport};
use crate::store::CardStore;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Card not found: {0}")]
    CardNotFound(String),

    #[error("Block for card {id} not found in {path}")]
    BlockNotFound { id: String, path: String },

    #[error("Card {0} has no block representation")]
    NotSerializable(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

pub struct Reconciler<'a> {
    store: &'a mut CardStore,
    syntax: BlockSyntax,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a mut CardStore, delimiter: char) -> Self {
        Self {
            store,
            syntax: BlockSyntax::new(delimiter),
        }
    }

    /// Reconcile one note. Only cards sourced from this note are candidates
    /// for removal; cross-file deletions need a whole-vault pass.
    pub fn sync_note(&mut self, path: &str, content: &str, now: DateTime<Utc>) -> SyncReport {
        let mut report = SyncReport::default();
        let mut seen = BTreeSet::new();
        self.apply_note(path, content, now, &mut seen, &mut report);
        self.remove_unseen(self.scope_for_note(path), &seen, &mut report);
        report.tags_deleted = self.store.rebuild_tag_registry();
        report
    }

    /// Reconcile the whole corpus. The only pass that reliably detects
    /// cross-file deletions: every known id is in scope.
    pub fn sync_vault(&mut self, vault: &dyn NoteVault, now: DateTime<Utc>) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut seen = BTreeSet::new();
        for path in vault.list_notes()? {
            let content = vault.read_note(&path)?;
            self.apply_note(&path, &content, now, &mut seen, &mut report);
        }
        let scope = self.scope_all();
        self.remove_unseen(scope, &seen, &mut report);
        report.tags_deleted = self.store.rebuild_tag_registry();
        Ok(report)
    }

    /// Re-serialize one card and splice it over its block in the source
    /// note, touching nothing else. A vanished block aborts the write.
    pub fn write_back(&self, vault: &mut dyn NoteVault, id: &str) -> Result<()> {
        let record = self
            .store
            .get_card(id)
            .ok_or_else(|| SyncError::CardNotFound(id.to_string()))?;
        let block_lines = blocks::serialize(record, &self.syntax)
            .ok_or_else(|| SyncError::NotSerializable(id.to_string()))?;

        let content = vault.read_note(&record.source_note_path)?;
        let lines: Vec<&str> = content.lines().collect();
        let range =
            blocks::find_range(&lines, id, &self.syntax).ok_or_else(|| SyncError::BlockNotFound {
                id: id.to_string(),
                path: record.source_note_path.clone(),
            })?;

        let mut out: Vec<String> = lines[..range.start].iter().map(|s| s.to_string()).collect();
        out.extend(block_lines);
        out.extend(lines[range.end..].iter().map(|s| s.to_string()));
        let mut text = out.join("\n");
        if content.ends_with('\n') {
            text.push('\n');
        }
        vault.write_note(&record.source_note_path, &text)?;
        Ok(())
    }

    /// Process every block of one note, marking ids (and derived child ids)
    /// as seen. Removal happens separately per scope.
    fn apply_note(
        &mut self,
        path: &str,
        content: &str,
        now: DateTime<Utc>,
        seen: &mut BTreeSet<String>,
        report: &mut SyncReport,
    ) {
        let lines: Vec<&str> = content.lines().collect();
        for block in blocks::scan(&lines, &self.syntax) {
            seen.insert(block.id.clone());
            let block_lines = &lines[block.start..block.end];
            match blocks::parse_block_lines(block_lines, &block.id, path, &self.syntax) {
                Err(reason) => {
                    report.quarantined += 1;
                    report.quarantined_ids.push(block.id.clone());
                    let dropped = self
                        .store
                        .quarantine(&block.id, path, block_lines.join("\n"), reason, now);
                    // Child cards derived from the broken parent are gone too
                    report.removed += dropped.len();
                }
                Ok(record) => {
                    if self.store.clear_quarantine(&record.id) {
                        log::info!("Card {} repaired, leaving quarantine", record.id);
                    }
                    self.classify(record.clone(), report);
                    self.sync_children(&record, seen, report);
                }
            }
        }
    }

    /// Added / Updated / no-op for one parsed record.
    fn classify(&mut self, record: CardRecord, report: &mut SyncReport) {
        enum Change {
            Added,
            Updated,
            None,
        }
        let change = match self.store.get_card(&record.id) {
            None => Change::Added,
            Some(existing) if !existing.content_eq(&record) => Change::Updated,
            Some(_) => Change::None,
        };
        match change {
            Change::Added => {
                self.store.upsert_card(record);
                report.added += 1;
            }
            Change::Updated => {
                self.store.upsert_card(record);
                report.updated += 1;
            }
            Change::None => {}
        }
    }

    /// Materialize child cards derived from a parent: one per cloze span, or
    /// one per occlusion rectangle. Child ids are stable functions of the
    /// parent id and ordinal, so scheduling history follows the ordinal.
    fn sync_children(
        &mut self,
        parent: &CardRecord,
        seen: &mut BTreeSet<String>,
        report: &mut SyncReport,
    ) {
        let children: Vec<CardRecord> = match &parent.payload {
            CardPayload::Cloze { text } => blocks::cloze_ordinals(text)
                .into_iter()
                .map(|ordinal| {
                    child_record(
                        parent,
                        format!("{}-c{}", parent.id, ordinal),
                        CardPayload::ClozeChild { ordinal },
                    )
                })
                .collect(),
            CardPayload::ImageOcclusion { .. } => self
                .store
                .occlusions(&parent.id)
                .iter()
                .map(|rect| {
                    child_record(
                        parent,
                        format!("{}-o{}", parent.id, rect.ordinal),
                        CardPayload::ImageOcclusionChild {
                            ordinal: rect.ordinal,
                        },
                    )
                })
                .collect(),
            _ => return,
        };

        for child in children {
            seen.insert(child.id.clone());
            self.classify(child, report);
        }
    }

    /// Ids sourced from one note: records plus quarantine entries.
    fn scope_for_note(&self, path: &str) -> Vec<String> {
        let mut ids = self.store.card_ids_in_note(path);
        ids.extend(self.store.quarantined_ids_in_note(path));
        ids
    }

    fn scope_all(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .store
            .get_all_cards()
            .iter()
            .map(|c| c.id.clone())
            .collect();
        ids.extend(
            self.store
                .quarantine_entries()
                .iter()
                .map(|q| q.id.clone()),
        );
        ids
    }

    /// Cascade-delete every in-scope id not seen this pass.
    fn remove_unseen(&mut self, scope: Vec<String>, seen: &BTreeSet<String>, report: &mut SyncReport) {
        for id in scope {
            if !seen.contains(&id) {
                // Quarantine-only entries have no record; count them once.
                let quarantined_only =
                    self.store.get_card(&id).is_none() && self.store.is_quarantined(&id);
                let removed = self.store.remove_card(&id);
                report.removed += removed.len();
                if quarantined_only {
                    report.removed += 1;
                }
            }
        }
    }
}

fn child_record(parent: &CardRecord, id: String, payload: CardPayload) -> CardRecord {
    let mut child = CardRecord::new(id, parent.source_note_path.clone(), payload);
    child.parent_id = Some(parent.id.clone());
    child.title = parent.title.clone();
    child.groups = parent.groups.clone();
    child
}
