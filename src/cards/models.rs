//! Data models for the card system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a fresh opaque card id token, suitable for embedding in an anchor.
pub fn new_card_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Type-specific content of a card.
///
/// Child variants (cloze/occlusion children) exist only in the store; they are
/// derived from their parent and never written back to note text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CardPayload {
    /// Simple question and answer
    Basic { question: String, answer: String },
    /// Reviewed in both directions
    Reversed { question: String, answer: String },
    /// Fill-in-the-blank text with inline `{{cN::answer}}` spans
    Cloze { text: String },
    /// One blank of a cloze parent
    ClozeChild { ordinal: u32 },
    /// Stem plus options; `correct` is a 0-based index into `options`
    MultipleChoice {
        stem: String,
        options: Vec<String>,
        correct: usize,
    },
    /// Stem plus steps that must be recalled in order
    OrderedQuestion { stem: String, steps: Vec<String> },
    /// Image with occlusion rectangles (geometry lives in the store)
    ImageOcclusion { image: String },
    /// One occluded region of an image-occlusion parent
    ImageOcclusionChild { ordinal: u32 },
}

impl CardPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Basic { .. } => "basic",
            Self::Reversed { .. } => "reversed",
            Self::Cloze { .. } => "cloze",
            Self::ClozeChild { .. } => "clozeChild",
            Self::MultipleChoice { .. } => "multipleChoice",
            Self::OrderedQuestion { .. } => "orderedQuestion",
            Self::ImageOcclusion { .. } => "imageOcclusion",
            Self::ImageOcclusionChild { .. } => "imageOcclusionChild",
        }
    }

    /// Whether this variant is a child derived from a parent card.
    pub fn is_child(&self) -> bool {
        matches!(
            self,
            Self::ClozeChild { .. } | Self::ImageOcclusionChild { .. }
        )
    }
}

/// The content of one card, independent of its scheduling state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRecord {
    pub id: String,
    /// Vault-relative path of the note the card's block lives in
    pub source_note_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub payload: CardPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl CardRecord {
    pub fn new(id: String, source_note_path: String, payload: CardPayload) -> Self {
        Self {
            id,
            source_note_path,
            title: None,
            payload,
            info: None,
            groups: Vec::new(),
            parent_id: None,
        }
    }

    /// Content equality; group order is irrelevant.
    pub fn content_eq(&self, other: &CardRecord) -> bool {
        let mut a = self.groups.clone();
        let mut b = other.groups.clone();
        a.sort();
        b.sort();
        self.id == other.id
            && self.source_note_path == other.source_note_path
            && self.title == other.title
            && self.payload == other.payload
            && self.info == other.info
            && self.parent_id == other.parent_id
            && a == b
    }
}

/// A card's scheduling lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    New,
    Learning,
    Review,
    Relearning,
    Suspended,
}

impl Default for Stage {
    fn default() -> Self {
        Self::New
    }
}

/// Review grade for a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Grade {
    Again,
    Hard,
    Good,
    Easy,
}

impl Grade {
    pub fn is_pass(&self) -> bool {
        !matches!(self, Grade::Again)
    }
}

/// Scheduling state for a card, keyed by the card id.
///
/// Content edits never touch this; only the scheduler and the explicit
/// suspend/unsuspend/reset operations do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardState {
    pub id: String,
    #[serde(default)]
    pub stage: Stage,
    pub due: DateTime<Utc>,
    #[serde(default)]
    pub scheduled_days: u32,
    #[serde(default)]
    pub reps: u32,
    #[serde(default)]
    pub lapses: u32,
    #[serde(default)]
    pub learning_step_index: u32,
    /// Stage to return to on unsuspend; set only while suspended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspended_from: Option<Stage>,
}

impl CardState {
    pub fn new(id: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            stage: Stage::New,
            due: now,
            scheduled_days: 0,
            reps: 0,
            lapses: 0,
            learning_step_index: 0,
            suspended_from: None,
        }
    }

    /// Due for review; suspended cards are never due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.stage != Stage::Suspended && self.due <= now
    }
}

/// A record of a single review, appended to the review log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewLogEntry {
    pub card_id: String,
    pub grade: Grade,
    /// Stage before the grade was applied
    pub stage: Stage,
    /// Interval in days after the grade was applied
    pub scheduled_days: u32,
    pub reviewed_at: DateTime<Utc>,
}

/// A card whose block failed to parse; retained for manual repair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarantineEntry {
    pub id: String,
    pub note_path: String,
    pub raw_text: String,
    pub reason: String,
    pub quarantined_at: DateTime<Utc>,
}

/// One occluded rectangle of an image-occlusion card, in image coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcclusionRect {
    pub ordinal: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Lifetime counters, persisted alongside the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Analytics {
    pub total_reviews: u64,
    pub total_lapses: u64,
    pub cards_added: u64,
    pub cards_removed: u64,
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub quarantined: usize,
    pub quarantined_ids: Vec<String>,
    pub tags_deleted: usize,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.added == 0
            && self.updated == 0
            && self.removed == 0
            && self.quarantined == 0
            && self.tags_deleted == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_card_id_is_anchor_safe() {
        let id = new_card_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, new_card_id());
    }

    #[test]
    fn test_content_eq_ignores_group_order() {
        let mut a = CardRecord::new(
            "x".into(),
            "n.md".into(),
            CardPayload::Basic {
                question: "q".into(),
                answer: "a".into(),
            },
        );
        let mut b = a.clone();
        a.groups = vec!["one".into(), "two".into()];
        b.groups = vec!["two".into(), "one".into()];
        assert!(a.content_eq(&b));
        b.groups.push("three".into());
        assert!(!a.content_eq(&b));
    }

    #[test]
    fn test_suspended_card_is_never_due() {
        let now = Utc::now();
        let mut state = CardState::new("x".into(), now);
        assert!(state.is_due(now));
        state.stage = Stage::Suspended;
        assert!(!state.is_due(now));
    }

    #[test]
    fn test_payload_tagged_serialization() {
        let payload = CardPayload::MultipleChoice {
            stem: "s".into(),
            options: vec!["a".into(), "b".into()],
            correct: 0,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "multipleChoice");
        let back: CardPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }
}
