//! Parsing of anchored blocks into card records.

use crate::cards::{CardPayload, CardRecord};

use super::scan::{cloze_ordinals, scan, BlockSyntax};

/// Outcome of looking at one block of text.
///
/// `NotACard` (no anchor) is distinct from `Invalid` (anchor present but the
/// declared card is malformed); the latter carries the id so the caller can
/// quarantine the block. Parsing never panics.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockParse {
    NotACard,
    Card(Box<CardRecord>),
    Invalid { id: String, reason: String },
}

/// Parse the first anchored block found in `raw`.
pub fn parse_block(raw: &str, source_note_path: &str, syntax: &BlockSyntax) -> BlockParse {
    let lines: Vec<&str> = raw.lines().collect();
    let blocks = scan(&lines, syntax);
    match blocks.first() {
        None => BlockParse::NotACard,
        Some(b) => {
            match parse_block_lines(&lines[b.start..b.end], &b.id, source_note_path, syntax) {
                Ok(record) => BlockParse::Card(Box::new(record)),
                Err(reason) => BlockParse::Invalid {
                    id: b.id.clone(),
                    reason,
                },
            }
        }
    }
}

/// Parse a block into a card, or `None` if the text holds no recognizable
/// card (anchor absent or required fields missing).
pub fn parse(raw: &str, source_note_path: &str, syntax: &BlockSyntax) -> Option<CardRecord> {
    match parse_block(raw, source_note_path, syntax) {
        BlockParse::Card(record) => Some(*record),
        _ => None,
    }
}

/// Parse the lines of one block (anchor first, as produced by `scan`).
pub fn parse_block_lines(
    lines: &[&str],
    id: &str,
    source_note_path: &str,
    syntax: &BlockSyntax,
) -> Result<CardRecord, String> {
    // Fold lines into (key, value) pairs; continuation lines extend the
    // previous value, blank lines survive only when followed by more of it.
    let mut fields: Vec<(String, String)> = Vec::new();
    let mut pending_blanks = 0usize;
    for line in lines.iter().skip(1) {
        if let Some((key, value)) = syntax.field_line(line) {
            pending_blanks = 0;
            fields.push((key.to_string(), value.to_string()));
        } else if line.trim().is_empty() {
            pending_blanks += 1;
        } else if let Some(last) = fields.last_mut() {
            for _ in 0..pending_blanks {
                last.1.push('\n');
            }
            pending_blanks = 0;
            last.1.push('\n');
            // Undo the serializer's escape of syntax-lookalike lines
            let text = line.strip_prefix(syntax.delimiter()).unwrap_or(line);
            last.1.push_str(text);
        } else {
            return Err("content before the first field line".to_string());
        }
    }

    let mut title: Option<String> = None;
    let mut question: Option<String> = None;
    let mut reversed_q: Option<String> = None;
    let mut answer: Option<String> = None;
    let mut cloze_q: Option<String> = None;
    let mut mcq_stem: Option<String> = None;
    let mut ordered_stem: Option<String> = None;
    let mut image: Option<String> = None;
    let mut info_parts: Vec<String> = Vec::new();
    let mut options: Vec<String> = Vec::new();
    let mut groups: Vec<String> = Vec::new();
    let mut steps: Vec<(u32, String)> = Vec::new();

    for (key, value) in fields {
        match key.as_str() {
            "T" => title = Some(value),
            "Q" => question = Some(value),
            "RQ" => reversed_q = Some(value),
            "A" => answer = Some(value),
            "CQ" => cloze_q = Some(value),
            "MCQ" => mcq_stem = Some(value),
            "OQ" => ordered_stem = Some(value),
            "IO" => image = Some(value),
            "I" => info_parts.push(value),
            "O" => push_list_items(&mut options, &value),
            "G" => push_list_items(&mut groups, &value),
            _ => {
                let n: u32 = key
                    .parse()
                    .map_err(|_| format!("unrecognized field key: {}", key))?;
                if !(1..=20).contains(&n) {
                    return Err(format!("step number {} out of range 1..20", n));
                }
                steps.push((n, value));
            }
        }
    }

    let payload = if let Some(text) = cloze_q {
        if cloze_ordinals(&text).is_empty() {
            return Err("cloze question has no {{cN::answer}} spans".to_string());
        }
        CardPayload::Cloze { text }
    } else if let Some(stem) = mcq_stem {
        if options.len() < 2 {
            return Err("multiple choice needs at least two options".to_string());
        }
        let correct: usize = answer
            .as_deref()
            .ok_or_else(|| "multiple choice is missing the correct option number".to_string())?
            .trim()
            .parse()
            .map_err(|_| "correct option must be a number".to_string())?;
        if correct == 0 || correct > options.len() {
            return Err(format!(
                "correct option {} outside 1..{}",
                correct,
                options.len()
            ));
        }
        CardPayload::MultipleChoice {
            stem,
            options,
            correct: correct - 1,
        }
    } else if let Some(stem) = ordered_stem {
        if steps.is_empty() {
            return Err("ordered question has no steps".to_string());
        }
        steps.sort_by_key(|(n, _)| *n);
        CardPayload::OrderedQuestion {
            stem,
            steps: steps.into_iter().map(|(_, s)| s).collect(),
        }
    } else if let Some(image) = image {
        if image.trim().is_empty() {
            return Err("image occlusion is missing the image reference".to_string());
        }
        CardPayload::ImageOcclusion { image }
    } else if let Some(q) = reversed_q {
        let answer = answer.ok_or_else(|| "reversed card is missing an answer".to_string())?;
        CardPayload::Reversed {
            question: q,
            answer,
        }
    } else if let Some(q) = question {
        let answer = answer.ok_or_else(|| "card is missing an answer".to_string())?;
        CardPayload::Basic {
            question: q,
            answer,
        }
    } else {
        return Err("no type field (Q/RQ/CQ/MCQ/OQ/IO) found".to_string());
    };

    let mut record = CardRecord::new(id.to_string(), source_note_path.to_string(), payload);
    record.title = title;
    record.info = if info_parts.is_empty() {
        None
    } else {
        Some(info_parts.join("\n"))
    };
    record.groups = groups;
    Ok(record)
}

/// Split a list-valued field (`O`, `G`) into items, one per line.
fn push_list_items(out: &mut Vec<String>, value: &str) {
    for part in value.split('\n') {
        let part = part.trim();
        if !part.is_empty() {
            out.push(part.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syntax() -> BlockSyntax {
        BlockSyntax::default()
    }

    #[test]
    fn test_parse_basic_card() {
        let record = parse("^sprout-abc123\nQ|What is 2+2?\nA|4", "math.md", &syntax())
            .expect("should parse");
        assert_eq!(record.id, "abc123");
        assert_eq!(
            record.payload,
            CardPayload::Basic {
                question: "What is 2+2?".to_string(),
                answer: "4".to_string(),
            }
        );
        assert_eq!(record.source_note_path, "math.md");
    }

    #[test]
    fn test_parse_no_anchor_is_not_a_card() {
        assert_eq!(
            parse_block("Q|question without anchor\nA|a", "n.md", &syntax()),
            BlockParse::NotACard
        );
    }

    #[test]
    fn test_parse_missing_answer_is_invalid_with_id() {
        match parse_block("^sprout-abc\nQ|only a question", "n.md", &syntax()) {
            BlockParse::Invalid { id, reason } => {
                assert_eq!(id, "abc");
                assert!(reason.contains("answer"));
            }
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_cloze_requires_spans() {
        assert!(matches!(
            parse_block("^sprout-c1\nCQ|no spans here", "n.md", &syntax()),
            BlockParse::Invalid { .. }
        ));
        let record = parse(
            "^sprout-c1\nCQ|The capital of {{c1::France}} is {{c2::Paris}}.",
            "n.md",
            &syntax(),
        )
        .expect("should parse");
        assert!(matches!(record.payload, CardPayload::Cloze { .. }));
    }

    #[test]
    fn test_parse_multiple_choice() {
        let record = parse(
            "^sprout-m1\nMCQ|Largest planet?\nO|Mars\nO|Jupiter\nO|Venus\nA|2",
            "n.md",
            &syntax(),
        )
        .expect("should parse");
        assert_eq!(
            record.payload,
            CardPayload::MultipleChoice {
                stem: "Largest planet?".to_string(),
                options: vec!["Mars".into(), "Jupiter".into(), "Venus".into()],
                correct: 1,
            }
        );
    }

    #[test]
    fn test_parse_mcq_correct_out_of_range() {
        assert!(matches!(
            parse_block(
                "^sprout-m1\nMCQ|stem\nO|a\nO|b\nA|3",
                "n.md",
                &syntax()
            ),
            BlockParse::Invalid { .. }
        ));
    }

    #[test]
    fn test_parse_ordered_steps_sorted_by_key() {
        let record = parse(
            "^sprout-o1\nOQ|Boot sequence\n2|kernel\n1|bootloader\n3|init",
            "n.md",
            &syntax(),
        )
        .expect("should parse");
        assert_eq!(
            record.payload,
            CardPayload::OrderedQuestion {
                stem: "Boot sequence".to_string(),
                steps: vec!["bootloader".into(), "kernel".into(), "init".into()],
            }
        );
    }

    #[test]
    fn test_parse_multiline_info_and_groups() {
        let record = parse(
            "^sprout-i1\nQ|q\nA|a\nI|first line\nsecond line\nG|alpha\nG|beta",
            "n.md",
            &syntax(),
        )
        .expect("should parse");
        assert_eq!(record.info.as_deref(), Some("first line\nsecond line"));
        assert_eq!(record.groups, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_parse_strips_continuation_escape() {
        let record = parse("^sprout-x1\nQ|q\nA|first\n|A|second", "n.md", &syntax()).expect("parse");
        assert_eq!(
            record.payload,
            CardPayload::Basic {
                question: "q".to_string(),
                answer: "first\nA|second".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_value_containing_delimiter() {
        let record = parse("^sprout-d1\nQ|a|b|c?\nA|x|y", "n.md", &syntax()).expect("parse");
        assert_eq!(
            record.payload,
            CardPayload::Basic {
                question: "a|b|c?".to_string(),
                answer: "x|y".to_string(),
            }
        );
    }
}
