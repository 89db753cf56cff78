//! Canonical in-memory card store and the persistence-safety guard.
//!
//! The persisted file is the sole durable copy of review history; it cannot
//! be rebuilt from notes. `assess_persist_safety` therefore vets every
//! candidate write against the last known persisted snapshot and refuses
//! ones that look like accidental data loss.

mod models;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use models::{SafetyVerdict, StoreSnapshot};

use crate::cards::{
    Analytics, CardRecord, CardState, Grade, OcclusionRect, QuarantineEntry, ReviewLogEntry,
    Stage,
};
use crate::scheduler::{self, SchedulerConfig};

/// Refuse an empty candidate when at least this many cards were on disk.
const EMPTY_REFUSE_MIN: usize = 10;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Card not found: {0}")]
    CardNotFound(String),

    #[error("Card is quarantined: {0}")]
    Quarantined(String),

    #[error("Card is suspended: {0}")]
    Suspended(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Default)]
pub struct CardStore {
    cards: BTreeMap<String, CardRecord>,
    states: BTreeMap<String, CardState>,
    quarantine: BTreeMap<String, QuarantineEntry>,
    review_log: Vec<ReviewLogEntry>,
    analytics: Analytics,
    occlusions: BTreeMap<String, Vec<OcclusionRect>>,
    tag_registry: BTreeMap<String, usize>,
    /// Card count of the last snapshot read from or written to disk
    last_persisted_count: Option<usize>,
    /// One-shot authorization for the next save to shrink drastically
    bulk_delete_authorized: bool,
}

impl CardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the store from a snapshot read from disk.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let count = snapshot.cards.len();
        Self {
            cards: snapshot.cards,
            states: snapshot.states,
            quarantine: snapshot.quarantine,
            review_log: snapshot.review_log,
            analytics: snapshot.analytics,
            occlusions: snapshot.occlusions,
            tag_registry: snapshot.tag_registry,
            last_persisted_count: Some(count),
            bulk_delete_authorized: false,
        }
    }

    pub fn to_snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            cards: self.cards.clone(),
            states: self.states.clone(),
            quarantine: self.quarantine.clone(),
            review_log: self.review_log.clone(),
            analytics: self.analytics.clone(),
            occlusions: self.occlusions.clone(),
            tag_registry: self.tag_registry.clone(),
        }
    }

    // ==================== Read Accessors ====================

    pub fn get_all_cards(&self) -> Vec<&CardRecord> {
        self.cards.values().collect()
    }

    pub fn get_card(&self, id: &str) -> Option<&CardRecord> {
        self.cards.get(id)
    }

    pub fn get_state(&self, id: &str) -> Option<&CardState> {
        self.states.get(id)
    }

    pub fn is_quarantined(&self, id: &str) -> bool {
        self.quarantine.contains_key(id)
    }

    pub fn quarantine_entries(&self) -> Vec<&QuarantineEntry> {
        self.quarantine.values().collect()
    }

    pub fn review_log(&self) -> &[ReviewLogEntry] {
        &self.review_log
    }

    pub fn analytics(&self) -> &Analytics {
        &self.analytics
    }

    pub fn tag_registry(&self) -> &BTreeMap<String, usize> {
        &self.tag_registry
    }

    pub fn card_count(&self) -> usize {
        self.cards.len()
    }

    /// Ids of all cards sourced from one note (children included).
    pub fn card_ids_in_note(&self, note_path: &str) -> Vec<String> {
        self.cards
            .values()
            .filter(|c| c.source_note_path == note_path)
            .map(|c| c.id.clone())
            .collect()
    }

    /// Ids of quarantine entries whose block lives in one note.
    pub fn quarantined_ids_in_note(&self, note_path: &str) -> Vec<String> {
        self.quarantine
            .values()
            .filter(|q| q.note_path == note_path)
            .map(|q| q.id.clone())
            .collect()
    }

    /// Cards due for review, suspended and quarantined excluded, oldest first.
    pub fn due_cards(&self, now: DateTime<Utc>) -> Vec<(&CardRecord, &CardState)> {
        let mut due: Vec<(&CardRecord, &CardState)> = self
            .cards
            .values()
            .filter(|c| !self.is_quarantined(&c.id))
            .filter_map(|c| self.states.get(&c.id).map(|s| (c, s)))
            .filter(|(_, s)| s.is_due(now))
            .collect();
        due.sort_by(|a, b| a.1.due.cmp(&b.1.due));
        due
    }

    // ==================== Content Mutation ====================

    /// Insert or overwrite a card record. Scheduling state is untouched.
    pub fn upsert_card(&mut self, record: CardRecord) -> bool {
        let added = !self.cards.contains_key(&record.id);
        if added {
            self.analytics.cards_added += 1;
        }
        self.cards.insert(record.id.clone(), record);
        added
    }

    /// Remove a card and everything keyed by its id: state, quarantine entry,
    /// occlusion geometry, and any child cards. Returns the removed ids.
    pub fn remove_card(&mut self, id: &str) -> Vec<String> {
        let mut removed = Vec::new();
        let children: Vec<String> = self
            .cards
            .values()
            .filter(|c| c.parent_id.as_deref() == Some(id))
            .map(|c| c.id.clone())
            .collect();
        for child in children {
            removed.extend(self.remove_card(&child));
        }
        if self.cards.remove(id).is_some() {
            self.analytics.cards_removed += 1;
            removed.push(id.to_string());
        }
        self.states.remove(id);
        self.quarantine.remove(id);
        self.occlusions.remove(id);
        removed
    }

    /// Quarantine a block that failed to parse. Any existing record for the
    /// id is removed (its content is broken), but the scheduling state is
    /// left untouched — a content edit going bad must not erase history.
    /// Returns the ids of derived child records dropped along the way.
    pub fn quarantine(
        &mut self,
        id: &str,
        note_path: &str,
        raw_text: String,
        reason: String,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        // Child records derive from the broken parent; drop them too, states
        // intact for when the parent is repaired.
        let children: Vec<String> = self
            .cards
            .values()
            .filter(|c| c.parent_id.as_deref() == Some(id))
            .map(|c| c.id.clone())
            .collect();
        let mut dropped = Vec::new();
        for child in children {
            if self.cards.remove(&child).is_some() {
                self.analytics.cards_removed += 1;
                dropped.push(child);
            }
        }
        if self.cards.remove(id).is_some() {
            self.analytics.cards_removed += 1;
        }
        log::warn!("Quarantining card {} from {}: {}", id, note_path, reason);
        self.quarantine.insert(
            id.to_string(),
            QuarantineEntry {
                id: id.to_string(),
                note_path: note_path.to_string(),
                raw_text,
                reason,
                quarantined_at: now,
            },
        );
        dropped
    }

    pub fn clear_quarantine(&mut self, id: &str) -> bool {
        self.quarantine.remove(id).is_some()
    }

    // ==================== Occlusion Geometry ====================

    pub fn occlusions(&self, id: &str) -> &[OcclusionRect] {
        self.occlusions.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_occlusions(&mut self, id: &str, rects: Vec<OcclusionRect>) {
        if rects.is_empty() {
            self.occlusions.remove(id);
        } else {
            self.occlusions.insert(id.to_string(), rects);
        }
    }

    // ==================== Scheduling ====================

    /// Existing state, or a freshly stored default new-card state. Idempotent.
    pub fn ensure_state(&mut self, id: &str, now: DateTime<Utc>) -> CardState {
        self.states
            .entry(id.to_string())
            .or_insert_with(|| CardState::new(id.to_string(), now))
            .clone()
    }

    /// Grade a card: advance its state, append to the review log, and bump
    /// analytics.
    pub fn grade(
        &mut self,
        id: &str,
        grade: Grade,
        config: &SchedulerConfig,
        now: DateTime<Utc>,
    ) -> Result<CardState> {
        if self.is_quarantined(id) {
            return Err(StoreError::Quarantined(id.to_string()));
        }
        if !self.cards.contains_key(id) {
            return Err(StoreError::CardNotFound(id.to_string()));
        }
        let state = self.ensure_state(id, now);
        if state.stage == Stage::Suspended {
            return Err(StoreError::Suspended(id.to_string()));
        }

        let next = scheduler::apply_grade(&state, grade, config, now);
        self.review_log.push(ReviewLogEntry {
            card_id: id.to_string(),
            grade,
            stage: state.stage,
            scheduled_days: next.scheduled_days,
            reviewed_at: now,
        });
        self.analytics.total_reviews += 1;
        if next.lapses > state.lapses {
            self.analytics.total_lapses += 1;
        }
        self.states.insert(id.to_string(), next.clone());
        Ok(next)
    }

    pub fn suspend(&mut self, id: &str, now: DateTime<Utc>) -> Result<CardState> {
        if !self.cards.contains_key(id) {
            return Err(StoreError::CardNotFound(id.to_string()));
        }
        let state = self.ensure_state(id, now);
        let next = scheduler::suspend(&state);
        self.states.insert(id.to_string(), next.clone());
        Ok(next)
    }

    pub fn unsuspend(&mut self, id: &str) -> Result<CardState> {
        let state = self
            .states
            .get(id)
            .ok_or_else(|| StoreError::CardNotFound(id.to_string()))?;
        let next = scheduler::unsuspend(state);
        self.states.insert(id.to_string(), next.clone());
        Ok(next)
    }

    /// Bulk maintenance: reset every card's scheduling to new-card defaults.
    pub fn reset_all_scheduling(&mut self, now: DateTime<Utc>) -> usize {
        let count = self.states.len();
        for state in self.states.values_mut() {
            *state = scheduler::reset_scheduling(state, now);
        }
        count
    }

    // ==================== Tag Registry ====================

    /// Recompute the registry from surviving records; returns how many tags
    /// dropped to zero references and were deleted.
    pub fn rebuild_tag_registry(&mut self) -> usize {
        let mut fresh: BTreeMap<String, usize> = BTreeMap::new();
        for card in self.cards.values() {
            for group in &card.groups {
                let group = group.trim();
                if !group.is_empty() {
                    *fresh.entry(group.to_string()).or_insert(0) += 1;
                }
            }
        }
        let deleted = self
            .tag_registry
            .keys()
            .filter(|tag| !fresh.contains_key(*tag))
            .count();
        self.tag_registry = fresh;
        deleted
    }

    // ==================== Persist Safety ====================

    /// Authorize the next save to drop most or all cards (explicit bulk
    /// delete). One-shot; cleared by the next persisted save.
    pub fn authorize_bulk_delete(&mut self) {
        self.bulk_delete_authorized = true;
    }

    /// Vet a candidate snapshot immediately before a disk write.
    pub fn assess_persist_safety(&self, candidate: &StoreSnapshot) -> SafetyVerdict {
        let last = self.last_persisted_count.unwrap_or(0);
        let next = candidate.cards.len();

        if self.bulk_delete_authorized {
            return SafetyVerdict::allow();
        }
        if next == 0 && last >= EMPTY_REFUSE_MIN {
            return SafetyVerdict::refuse(format!(
                "candidate write has 0 cards but {} were on disk; review history would be destroyed",
                last
            ));
        }
        if last > 0 && next < last / 2 {
            return SafetyVerdict::backup_first(format!(
                "card count regressed from {} to {} without an explicit bulk delete",
                last, next
            ));
        }
        SafetyVerdict::allow()
    }

    /// Record that a snapshot with `count` cards is now the on-disk copy.
    pub fn note_persisted(&mut self, count: usize) {
        self.last_persisted_count = Some(count);
        self.bulk_delete_authorized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::CardPayload;

    fn card(id: &str, groups: &[&str]) -> CardRecord {
        let mut record = CardRecord::new(
            id.to_string(),
            "note.md".to_string(),
            CardPayload::Basic {
                question: "q".into(),
                answer: "a".into(),
            },
        );
        record.groups = groups.iter().map(|g| g.to_string()).collect();
        record
    }

    fn store_with_cards(n: usize) -> CardStore {
        let mut store = CardStore::new();
        for i in 0..n {
            store.upsert_card(card(&format!("id{}", i), &[]));
        }
        store.note_persisted(n);
        store
    }

    #[test]
    fn test_ensure_state_is_idempotent() {
        let mut store = store_with_cards(1);
        let now = Utc::now();
        let first = store.ensure_state("id0", now);
        let later = Utc::now();
        let second = store.ensure_state("id0", later);
        assert_eq!(first, second);
        assert_eq!(first.stage, Stage::New);
        assert_eq!(first.due, now);
    }

    #[test]
    fn test_grade_appends_log_and_analytics() {
        let mut store = store_with_cards(1);
        let now = Utc::now();
        let state = store.grade("id0", Grade::Good, &SchedulerConfig::default(), now);
        assert!(state.is_ok());
        assert_eq!(store.review_log().len(), 1);
        assert_eq!(store.analytics().total_reviews, 1);
    }

    #[test]
    fn test_grade_unknown_or_quarantined_fails() {
        let mut store = store_with_cards(1);
        let now = Utc::now();
        assert!(matches!(
            store.grade("missing", Grade::Good, &SchedulerConfig::default(), now),
            Err(StoreError::CardNotFound(_))
        ));
        store.quarantine("id0", "note.md", "raw".into(), "broken".into(), now);
        assert!(matches!(
            store.grade("id0", Grade::Good, &SchedulerConfig::default(), now),
            Err(StoreError::Quarantined(_))
        ));
    }

    #[test]
    fn test_quarantine_removes_record_keeps_state() {
        let mut store = store_with_cards(1);
        let now = Utc::now();
        store.ensure_state("id0", now);
        store.quarantine("id0", "note.md", "raw".into(), "bad".into(), now);
        assert!(store.get_card("id0").is_none());
        assert!(store.is_quarantined("id0"));
        assert!(store.get_state("id0").is_some());
    }

    #[test]
    fn test_quarantine_drops_children_and_counts_them() {
        let mut store = CardStore::new();
        let mut parent = card("p1", &[]);
        parent.payload = CardPayload::Cloze {
            text: "{{c1::x}}".into(),
        };
        store.upsert_card(parent);
        let mut child = card("p1-c1", &[]);
        child.payload = CardPayload::ClozeChild { ordinal: 1 };
        child.parent_id = Some("p1".to_string());
        store.upsert_card(child);
        let now = Utc::now();
        store.ensure_state("p1-c1", now);

        let dropped = store.quarantine("p1", "note.md", "raw".into(), "bad".into(), now);
        assert_eq!(dropped, vec!["p1-c1".to_string()]);
        assert_eq!(store.analytics().cards_removed, 2);
        assert!(store.get_card("p1-c1").is_none());
        assert!(store.get_state("p1-c1").is_some());
    }

    #[test]
    fn test_remove_card_cascades_to_children() {
        let mut store = CardStore::new();
        let mut parent = card("p1", &[]);
        parent.payload = CardPayload::Cloze {
            text: "{{c1::x}}".into(),
        };
        store.upsert_card(parent);
        let mut child = card("p1-c1", &[]);
        child.payload = CardPayload::ClozeChild { ordinal: 1 };
        child.parent_id = Some("p1".to_string());
        store.upsert_card(child);
        store.ensure_state("p1-c1", Utc::now());

        let removed = store.remove_card("p1");
        assert!(removed.contains(&"p1".to_string()));
        assert!(removed.contains(&"p1-c1".to_string()));
        assert!(store.get_state("p1-c1").is_none());
    }

    #[test]
    fn test_tag_registry_counts_deletions() {
        let mut store = CardStore::new();
        store.upsert_card(card("a", &["shared", "only-a"]));
        store.upsert_card(card("b", &["shared"]));
        assert_eq!(store.rebuild_tag_registry(), 0);
        assert_eq!(store.tag_registry().get("shared"), Some(&2));

        store.remove_card("a");
        assert_eq!(store.rebuild_tag_registry(), 1);
        assert!(store.tag_registry().get("only-a").is_none());
    }

    #[test]
    fn test_empty_candidate_over_full_disk_is_refused() {
        let store = store_with_cards(500);
        let verdict = store.assess_persist_safety(&StoreSnapshot::default());
        assert!(!verdict.allow);
    }

    #[test]
    fn test_bulk_delete_authorizes_empty_candidate() {
        let mut store = store_with_cards(500);
        store.authorize_bulk_delete();
        let verdict = store.assess_persist_safety(&StoreSnapshot::default());
        assert!(verdict.allow);
        assert!(!verdict.backup_first);
    }

    #[test]
    fn test_large_regression_requires_backup() {
        let mut store = store_with_cards(100);
        for i in 10..100 {
            store.remove_card(&format!("id{}", i));
        }
        let verdict = store.assess_persist_safety(&store.to_snapshot());
        assert!(verdict.allow);
        assert!(verdict.backup_first);
    }

    #[test]
    fn test_unchanged_candidate_allowed() {
        let store = store_with_cards(20);
        let verdict = store.assess_persist_safety(&store.to_snapshot());
        assert!(verdict.allow);
        assert!(!verdict.backup_first);
    }

    #[test]
    fn test_due_cards_excludes_suspended() {
        let mut store = store_with_cards(2);
        let now = Utc::now();
        store.ensure_state("id0", now);
        store.ensure_state("id1", now);
        store.suspend("id1", now).unwrap();
        let due = store.due_cards(now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0.id, "id0");
    }
}
