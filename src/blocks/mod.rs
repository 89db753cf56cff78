//! Card block text format: scanning, parsing, serialization, location.
//!
//! A card lives in a note as an anchored block:
//!
//! ```text
//! ^sprout-abc123
//! Q|What is 2+2?
//! A|4
//! G|arithmetic
//! ```
//!
//! The anchor carries the card's stable id; every following line is
//! `<Key><Delimiter><Value>` (delimiter configurable, default `|`), with
//! non-field lines continuing the previous field's value. A continuation
//! line that would itself read as a field line, anchor, or heading is
//! written with one leading delimiter, stripped back off on parse.

mod parse;
mod scan;
mod serialize;

pub use parse::{parse, parse_block, parse_block_lines, BlockParse};
pub use scan::{cloze_ordinals, find_range, scan, BlockSyntax, RawBlock};
pub use serialize::serialize;

/// Default field delimiter; overridable in settings.
pub const DEFAULT_DELIMITER: char = '|';
