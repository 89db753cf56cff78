//! Canonical serialization of card records back to block lines.

use crate::cards::{CardPayload, CardRecord};

use super::scan::BlockSyntax;

/// Serialize a card into its canonical block lines (anchor first).
///
/// Round-trips: parsing the returned lines yields a field-equal record.
/// Child variants have no text representation and return `None`.
pub fn serialize(record: &CardRecord, syntax: &BlockSyntax) -> Option<Vec<String>> {
    if record.payload.is_child() {
        return None;
    }

    let mut lines = vec![format!("^sprout-{}", record.id)];

    if let Some(title) = &record.title {
        push_field(&mut lines, "T", syntax, title);
    }

    match &record.payload {
        CardPayload::Basic { question, answer } => {
            push_field(&mut lines, "Q", syntax, question);
            push_field(&mut lines, "A", syntax, answer);
        }
        CardPayload::Reversed { question, answer } => {
            push_field(&mut lines, "RQ", syntax, question);
            push_field(&mut lines, "A", syntax, answer);
        }
        CardPayload::Cloze { text } => {
            push_field(&mut lines, "CQ", syntax, text);
        }
        CardPayload::MultipleChoice {
            stem,
            options,
            correct,
        } => {
            push_field(&mut lines, "MCQ", syntax, stem);
            for option in options {
                push_field(&mut lines, "O", syntax, option);
            }
            push_field(&mut lines, "A", syntax, &(correct + 1).to_string());
        }
        CardPayload::OrderedQuestion { stem, steps } => {
            push_field(&mut lines, "OQ", syntax, stem);
            for (i, step) in steps.iter().enumerate() {
                push_field(&mut lines, &(i + 1).to_string(), syntax, step);
            }
        }
        CardPayload::ImageOcclusion { image } => {
            push_field(&mut lines, "IO", syntax, image);
        }
        CardPayload::ClozeChild { .. } | CardPayload::ImageOcclusionChild { .. } => {
            unreachable!("child payloads are rejected above")
        }
    }

    if let Some(info) = &record.info {
        push_field(&mut lines, "I", syntax, info);
    }
    for group in &record.groups {
        push_field(&mut lines, "G", syntax, group);
    }

    Some(lines)
}

/// Emit one field; later lines of a multi-line value become continuation
/// lines. A continuation line that would itself read as a field line,
/// anchor, or heading (or that starts with the delimiter) is written with
/// one leading delimiter, which the parser strips back off.
fn push_field(lines: &mut Vec<String>, key: &str, syntax: &BlockSyntax, value: &str) {
    let d = syntax.delimiter();
    let mut parts = value.split('\n');
    let first = parts.next().unwrap_or("");
    lines.push(format!("{}{}{}", key, d, first));
    for rest in parts {
        if rest.starts_with(d)
            || syntax.field_line(rest).is_some()
            || syntax.anchor_id(rest).is_some()
            || syntax.is_heading(rest)
        {
            lines.push(format!("{}{}", d, rest));
        } else {
            lines.push(rest.to_string());
        }
    }
}
