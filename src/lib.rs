//! Sprout keeps flashcards embedded in plain-text notes synchronized with a
//! structured, durable database that also tracks per-card spaced-repetition
//! scheduling.
//!
//! - [`blocks`] — the card block text format: parse, serialize, locate.
//! - [`cards`] — card records, scheduling state, review log, quarantine.
//! - [`reconcile`] — merges parsed note content into the store.
//! - [`scheduler`] — the pure scheduling state machine.
//! - [`store`] — the canonical in-memory maps and the persist-safety guard.
//! - [`persist`] — the durable document and the save gatekeeper.

pub mod blocks;
pub mod cards;
pub mod persist;
pub mod reconcile;
pub mod scheduler;
pub mod store;

pub use cards::{CardPayload, CardRecord, CardState, Grade, Stage, SyncReport};
pub use persist::{FsDocumentStore, Gatekeeper, Settings};
pub use reconcile::{FsNoteVault, NoteVault, Reconciler};
pub use scheduler::SchedulerConfig;
pub use store::CardStore;
