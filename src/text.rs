//! Shared text utilities
//!
//! Accent folding, whitespace normalization, and boundary segmentation used
//! by the splitter, the router, and the query parser.

use lazy_static::lazy_static;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref MULTI_SPACE: Regex = Regex::new(r"[ \t]+").expect("static regex");
    static ref MULTI_BLANK: Regex = Regex::new(r"\n{3,}").expect("static regex");
    static ref SENTENCE_END: Regex = Regex::new(r#"[.!?]['")\]]?\s"#).expect("static regex");
}

/// Strip diacritics: NFD decomposition with combining marks removed
pub fn strip_accents(text: &str) -> String {
    text.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Lowercased, accent-stripped form used for comparisons
pub fn fold_for_comparison(text: &str) -> String {
    strip_accents(text).to_lowercase()
}

/// Collapse runs of spaces/tabs and excess blank lines; trim edges
pub fn normalize_whitespace(text: &str) -> String {
    let collapsed = MULTI_SPACE.replace_all(text, " ");
    let lines: Vec<&str> = collapsed.lines().map(str::trim_end).collect();
    let joined = lines.join("\n");
    MULTI_BLANK.replace_all(&joined, "\n\n").trim().to_string()
}

/// Split text into paragraphs on blank lines
pub fn split_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split a paragraph into sentences, keeping terminators
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for m in SENTENCE_END.find_iter(text) {
        let end = m.end();
        let sentence = text[start..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        start = end;
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}

/// Collapse consecutive duplicate paragraphs (case- and accent-insensitive)
pub fn collapse_repeated_paragraphs(paragraphs: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(paragraphs.len());
    let mut previous_key: Option<String> = None;

    for paragraph in paragraphs {
        let key = fold_for_comparison(paragraph.trim());
        if previous_key.as_deref() == Some(key.as_str()) {
            continue;
        }
        previous_key = Some(key);
        out.push(paragraph);
    }

    out
}

/// Short line in capitals: ≤ 80 chars, ≥ 60% letters, no lowercase
pub fn is_all_caps_title(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.chars().count() > 80 {
        return false;
    }

    let total = trimmed.chars().filter(|c| !c.is_whitespace()).count();
    if total == 0 {
        return false;
    }
    let letters = trimmed.chars().filter(|c| c.is_alphabetic()).count();
    if (letters as f64) < 0.6 * total as f64 {
        return false;
    }

    !trimmed.chars().any(|c| c.is_lowercase())
}
