//! Parsing of model output.
//!
//! Generation backends return prose, reasoning transcripts, or loosely
//! formatted JSON; the parsers here recover structured data from all of
//! them. Objective extraction runs an ordered list of strategies from
//! strictest to loosest and stops at the first that yields anything
//! usable. Quiz output is schema-constrained upstream, so a quiz that
//! fails to parse is a hard error rather than something to salvage.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::{QuizQuestion, Section};
use crate::validate::is_placeholder;

/// Raw model output beyond this is noise; parsing only looks at the head.
const MAX_PARSE_CHARS: usize = 10_000;
/// A reasoning-stripped remainder shorter than this is assumed to be a
/// truncation artifact and the full text is used instead.
const MIN_STRIPPED_CHARS: usize = 50;

/// Remove a leading reasoning transcript (`... </think> answer`).
pub fn strip_reasoning(text: &str) -> &str {
    match text.rsplit_once("</think>") {
        Some((_, after)) => {
            let after = after.trim();
            if after.chars().count() > MIN_STRIPPED_CHARS {
                after
            } else {
                text.trim()
            }
        }
        None => text.trim(),
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Extract a list of objective strings from raw model output.
///
/// Strategies, in order:
/// 1. first flat JSON string array in the text
/// 2. the same, after stripping a reasoning transcript
/// 3. balanced-bracket scan from the last `[` backwards
/// 4. numbered / bulleted / `Objective N:` lines
///
/// A strategy that only finds placeholder filler is skipped wholesale so
/// a later, looser strategy gets a chance at the real content.
pub fn parse_objectives(raw: &str) -> Result<Vec<String>> {
    let text = truncate_chars(raw, MAX_PARSE_CHARS);

    let strategies: [(&str, fn(&str) -> Option<Vec<String>>); 4] = [
        ("json_array", find_flat_json_array),
        ("after_reasoning", |t| {
            find_flat_json_array(strip_reasoning(t))
        }),
        ("bracket_scan", bracket_scan_reversed),
        ("line_patterns", extract_list_lines),
    ];

    for (name, strategy) in strategies {
        if let Some(items) = strategy(text) {
            let items: Vec<String> = items
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if items.is_empty() {
                continue;
            }
            if items.iter().all(|s| is_placeholder(s)) {
                tracing::debug!(strategy = name, "strategy yielded only placeholders");
                continue;
            }
            tracing::debug!(strategy = name, count = items.len(), "parsed objectives");
            return Ok(items);
        }
    }
    Err(Error::parse(format!(
        "no objective list found in model output ({} chars)",
        raw.chars().count()
    )))
}

/// First `[...]` without nested brackets that parses as a string array.
fn find_flat_json_array(text: &str) -> Option<Vec<String>> {
    static FLAT_ARRAY: OnceLock<Regex> = OnceLock::new();
    let re = FLAT_ARRAY.get_or_init(|| Regex::new(r"\[[^\[\]]*\]").unwrap());
    for m in re.find_iter(text) {
        if let Ok(items) = serde_json::from_str::<Vec<String>>(m.as_str()) {
            if !items.is_empty() {
                return Some(items);
            }
        }
    }
    None
}

/// Scan `[` positions from the end of the text, matching brackets by
/// depth, and return the first balanced span that parses. Model output
/// usually puts the final answer last, after any reasoning.
fn bracket_scan_reversed(text: &str) -> Option<Vec<String>> {
    let bytes = text.as_bytes();
    let opens: Vec<usize> = bytes
        .iter()
        .enumerate()
        .filter(|(_, &b)| b == b'[')
        .map(|(i, _)| i)
        .collect();
    for &start in opens.iter().rev() {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (i, &b) in bytes.iter().enumerate().skip(start) {
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'[' => depth += 1,
                b']' => {
                    depth -= 1;
                    if depth == 0 {
                        if let Ok(items) =
                            serde_json::from_str::<Vec<String>>(&text[start..=i])
                        {
                            if !items.is_empty() {
                                return Some(items);
                            }
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
    }
    None
}

/// Numbered, bulleted, or `Objective N:` lines.
fn extract_list_lines(text: &str) -> Option<Vec<String>> {
    static LINE: OnceLock<Regex> = OnceLock::new();
    let re = LINE.get_or_init(|| {
        Regex::new(r#"(?im)^\s*(?:\d+[.)]\s+|[-*]\s+|objective\s+\d+\s*:\s*)["']?(.+?)["']?\s*$"#)
            .unwrap()
    });
    let items: Vec<String> = re
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

#[derive(Deserialize)]
struct QuestionsPayload {
    questions: Vec<QuizQuestion>,
}

/// Parse the question list produced under a guided-JSON schema.
///
/// Invalid output is a hard [`Error::Parse`]: the schema should have
/// prevented it, so salvage attempts would only mask backend problems.
pub fn parse_quiz_questions(raw: &str) -> Result<Vec<QuizQuestion>> {
    let text = strip_reasoning(raw);
    let json = extract_json_object(text)
        .ok_or_else(|| Error::parse("no JSON object found in quiz output"))?;
    let payload: QuestionsPayload = serde_json::from_str(json)
        .map_err(|e| Error::parse(format!("quiz output does not match schema: {}", e)))?;

    for (i, q) in payload.questions.iter().enumerate() {
        let expected_id = i as i64 + 1;
        if q.id != expected_id {
            return Err(Error::parse(format!(
                "question ids must be contiguous from 1: found {} at position {}",
                q.id, expected_id
            )));
        }
        let label = q.correct_answer.trim();
        let matches_option = q.options.iter().any(|opt| {
            let opt = opt.trim();
            opt == label
                || opt.strip_prefix(label).map_or(false, |rest| {
                    rest.starts_with(')') || rest.starts_with('.') || rest.starts_with(':')
                })
        });
        if !matches_option {
            return Err(Error::parse(format!(
                "question {}: correct answer {:?} matches no option",
                q.id, q.correct_answer
            )));
        }
    }
    Ok(payload.questions)
}

/// First balanced `{...}` span in the text, string-aware.
fn extract_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = bytes.iter().position(|&b| b == b'{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split generated markdown into titled sections at `##` headings. Text
/// before the first heading becomes an untitled preamble section.
pub fn parse_sections(markdown: &str) -> Vec<Section> {
    static HEADING: OnceLock<Regex> = OnceLock::new();
    let re = HEADING.get_or_init(|| Regex::new(r"(?m)^#{1,3}\s+(.+)$").unwrap());

    let mut sections = Vec::new();
    let mut last_title: Option<String> = None;
    let mut last_end = 0usize;
    for m in re.captures_iter(markdown) {
        let whole = m.get(0).unwrap();
        let body = markdown[last_end..whole.start()].trim();
        match last_title.take() {
            Some(title) => sections.push(Section {
                title,
                body: body.to_string(),
            }),
            None if !body.is_empty() => sections.push(Section {
                title: String::new(),
                body: body.to_string(),
            }),
            None => {}
        }
        last_title = Some(m.get(1).unwrap().as_str().trim().to_string());
        last_end = whole.end();
    }
    let tail = markdown[last_end..].trim();
    match last_title {
        Some(title) => sections.push(Section {
            title,
            body: tail.to_string(),
        }),
        None if !tail.is_empty() => sections.push(Section {
            title: String::new(),
            body: tail.to_string(),
        }),
        None => {}
    }
    sections
}
