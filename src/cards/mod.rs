//! Card data model: records, scheduling state, review log, quarantine.

mod models;

pub use models::{
    new_card_id, Analytics, CardPayload, CardRecord, CardState, Grade, OcclusionRect,
    QuarantineEntry, ReviewLogEntry, Stage, SyncReport,
};
