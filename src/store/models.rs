//! Serializable store aggregate and safety verdicts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cards::{
    Analytics, CardRecord, CardState, OcclusionRect, QuarantineEntry, ReviewLogEntry,
};

/// The full store aggregate as persisted inside the document's `store`
/// section. BTreeMap keys keep the serialized form diff-stable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSnapshot {
    pub cards: BTreeMap<String, CardRecord>,
    pub states: BTreeMap<String, CardState>,
    pub quarantine: BTreeMap<String, QuarantineEntry>,
    pub review_log: Vec<ReviewLogEntry>,
    pub analytics: Analytics,
    pub occlusions: BTreeMap<String, Vec<OcclusionRect>>,
    pub tag_registry: BTreeMap<String, usize>,
}

/// Outcome of the persist-safety assessment run before every disk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyVerdict {
    pub allow: bool,
    pub backup_first: bool,
    pub reason: String,
}

impl SafetyVerdict {
    pub fn allow() -> Self {
        Self {
            allow: true,
            backup_first: false,
            reason: String::new(),
        }
    }

    pub fn backup_first(reason: String) -> Self {
        Self {
            allow: true,
            backup_first: true,
            reason,
        }
    }

    pub fn refuse(reason: String) -> Self {
        Self {
            allow: false,
            backup_first: false,
            reason,
        }
    }
}
