//! Block scanning and location.
//!
//! One scanner determines block extents for both parsing and in-place
//! rewriting, so the two can never disagree about where a block ends.

use std::ops::Range;

use regex::Regex;

/// Compiled patterns for the block syntax under one delimiter.
///
/// The delimiter is a runtime setting, so the field pattern is built with
/// `regex::escape` rather than a constant.
pub struct BlockSyntax {
    delimiter: char,
    anchor: Regex,
    field: Regex,
    heading: Regex,
}

impl BlockSyntax {
    pub fn new(delimiter: char) -> Self {
        let d = regex::escape(&delimiter.to_string());
        // Longer keys first so e.g. `IO` is not read as `I` + value.
        let field = Regex::new(&format!(
            r"^(CQ|MCQ|RQ|OQ|IO|T|Q|A|O|I|G|[0-9]{{1,2}}){}(.*)$",
            d
        ))
        .unwrap();
        Self {
            delimiter,
            anchor: Regex::new(r"^\^sprout-([A-Za-z0-9][A-Za-z0-9-]*)\s*$").unwrap(),
            field,
            heading: Regex::new(r"^#{1,6}\s").unwrap(),
        }
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Extract the card id if this line is an anchor.
    pub fn anchor_id<'a>(&self, line: &'a str) -> Option<&'a str> {
        self.anchor
            .captures(line)
            .map(|c| c.get(1).map_or("", |m| m.as_str()))
    }

    /// Split this line into (key, value) if it is a field line.
    pub fn field_line<'a>(&self, line: &'a str) -> Option<(&'a str, &'a str)> {
        self.field.captures(line).map(|c| {
            let key = c.get(1).map_or("", |m| m.as_str());
            let value = c.get(2).map_or("", |m| m.as_str());
            (key, value)
        })
    }

    pub fn is_heading(&self, line: &str) -> bool {
        self.heading.is_match(line)
    }
}

impl Default for BlockSyntax {
    fn default() -> Self {
        Self::new(super::DEFAULT_DELIMITER)
    }
}

/// One anchored block found in a note: `lines[start..end]`, anchor included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    pub start: usize,
    pub end: usize,
    pub id: String,
}

/// Find every anchored block in a note.
///
/// A block runs from its anchor to the next anchor, a heading, or
/// end-of-file. A blank line followed by something that is not a field line
/// ends the block too (that is prose, not card content) — except inside a
/// multi-line `I` field, whose value may contain blank lines. Trailing blank
/// lines are never part of the block.
pub fn scan(lines: &[&str], syntax: &BlockSyntax) -> Vec<RawBlock> {
    let mut blocks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let id = match syntax.anchor_id(lines[i]) {
            Some(id) => id.to_string(),
            None => {
                i += 1;
                continue;
            }
        };

        let start = i;
        let mut last_content = i;
        let mut blank_seen = false;
        let mut open_key: Option<String> = None;
        let mut j = i + 1;

        while j < lines.len() {
            let line = lines[j];
            if syntax.anchor_id(line).is_some() || syntax.is_heading(line) {
                break;
            }
            if let Some((key, _)) = syntax.field_line(line) {
                last_content = j;
                blank_seen = false;
                open_key = Some(key.to_string());
            } else if line.trim().is_empty() {
                blank_seen = true;
            } else if blank_seen && open_key.as_deref() != Some("I") {
                // prose paragraph after a gap
                break;
            } else {
                // continuation of the previous field's value
                last_content = j;
                blank_seen = false;
            }
            j += 1;
        }

        blocks.push(RawBlock {
            start,
            end: last_content + 1,
            id,
        });
        i = j;
    }

    blocks
}

/// Locate the exact line range of one card's block.
///
/// Replacing `lines[range]` with freshly serialized lines is a minimal edit
/// that touches nothing else in the note. `None` means the block vanished;
/// callers must abort the write rather than guess.
pub fn find_range(lines: &[&str], id: &str, syntax: &BlockSyntax) -> Option<Range<usize>> {
    scan(lines, syntax)
        .into_iter()
        .find(|b| b.id == id)
        .map(|b| b.start..b.end)
}

/// Distinct cloze ordinals (`{{cN::…}}`) in a cloze question, sorted.
pub fn cloze_ordinals(text: &str) -> Vec<u32> {
    let re = Regex::new(r"\{\{c(\d+)::(.+?)\}\}").unwrap();
    let mut ords: Vec<u32> = re
        .captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    ords.sort_unstable();
    ords.dedup();
    ords
}
