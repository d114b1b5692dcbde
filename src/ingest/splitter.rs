//! Two-phase text splitter
//!
//! Phase A cuts a markdown document into title-driven chapters, recursively
//! subsplitting anything over the content-class target. Phase B cuts each
//! chapter into token-budgeted excerpt chunks. The splitter never fails: a
//! document with no detectable structure becomes a single chapter.

use crate::config::SplitterConfig;
use crate::ingest::router::ContentClass;
use crate::model::ChunkKind;
use crate::text::{
    collapse_repeated_paragraphs, is_all_caps_title, normalize_whitespace, split_paragraphs,
    split_sentences,
};
use crate::tokens::TokenCounter;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref MD_HEADING: Regex = Regex::new(r"^(#{1,6})\s+(.+)$").expect("static regex");
    static ref NUMBERED_HEADING: Regex = Regex::new(r"^\d+(\.\d+)*\s+\S").expect("static regex");
    static ref NORMATIVE_HEADING: Regex =
        Regex::new(r"(?i)^\s*(t[íi]tulo|cap[íi]tulo|se[çc][ãa]o|art(igo)?\.?)\s+\S")
            .expect("static regex");
}

/// Longest line still considered a numbered heading
const MAX_NUMBERED_TITLE_CHARS: usize = 100;

/// A chapter produced by phase A
#[derive(Debug, Clone)]
pub struct SplitChapter {
    pub title: String,
    pub text: String,
    pub order_in_document: i32,
    pub token_start: i64,
    pub token_end: i64,
    pub token_count: i64,
}

/// A chunk produced by phase B
#[derive(Debug, Clone)]
pub struct SplitChunk {
    pub kind: ChunkKind,
    pub text: String,
    pub order_in_chapter: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TitleStyle {
    Markdown { level: usize },
    Numbered,
    AllCaps,
    Normative,
}

/// Unit granularity during phase B packing
struct PackUnit {
    text: String,
    tokens: usize,
    /// True when the unit ends on a paragraph boundary
    paragraph: bool,
}

/// Two-phase splitter
#[derive(Clone)]
pub struct TextSplitter {
    config: SplitterConfig,
    counter: TokenCounter,
}

impl TextSplitter {
    pub fn new(config: SplitterConfig, counter: TokenCounter) -> Self {
        Self { config, counter }
    }

    pub fn config(&self) -> &SplitterConfig {
        &self.config
    }

    /// Phase A: split a document into ordered chapters.
    pub fn split_chapters(
        &self,
        text: &str,
        class: ContentClass,
        model: &str,
    ) -> Vec<SplitChapter> {
        let normalized = normalize_document(text);
        if normalized.is_empty() {
            return Vec::new();
        }

        let target = self.config.chapter_targets.for_class(class);
        let lines: Vec<&str> = normalized.lines().collect();
        let style = detect_style(&lines, class);

        let raw = match style {
            Some(style) => split_by_style(&lines, style),
            None => vec![("Preamble".to_string(), normalized.clone())],
        };

        // Recursive subsplit of oversized chapters
        let mut parts: Vec<(String, String)> = Vec::new();
        for (title, body) in raw {
            let tokens = self.counter.count(&body, model);
            if tokens > target {
                let next_level = match style {
                    Some(TitleStyle::Markdown { level }) => level + 1,
                    _ => 7,
                };
                parts.extend(self.subsplit(&title, &body, target, next_level, model));
            } else {
                parts.push((title, body));
            }
        }

        // Assign orders and cumulative token ranges
        let mut chapters = Vec::with_capacity(parts.len());
        let mut cursor: i64 = 0;
        for (index, (title, body)) in parts.into_iter().enumerate() {
            let token_count = self.counter.count(&body, model) as i64;
            chapters.push(SplitChapter {
                title,
                text: body,
                order_in_document: index as i32,
                token_start: cursor,
                token_end: cursor + token_count,
                token_count,
            });
            cursor += token_count;
        }

        chapters
    }

    /// Phase B: split one chapter into excerpt chunks.
    ///
    /// A chapter at or under the ideal chunk size becomes a single chunk of
    /// kind `Chapter` and phase B proper is skipped.
    pub fn split_chunks(
        &self,
        chapter_text: &str,
        max_tokens: usize,
        model: &str,
    ) -> Vec<SplitChunk> {
        let ideal = self.config.chunk_ideal_tokens;
        let min = self.config.chunk_min_tokens;

        let total = self.counter.count(chapter_text, model);
        if total <= ideal {
            return vec![SplitChunk {
                kind: ChunkKind::Chapter,
                text: chapter_text.to_string(),
                order_in_chapter: None,
            }];
        }

        // Cut window: prefer a boundary before 1.3x the ideal size, never
        // past the embedding limit
        let high = ((ideal as f64 * 1.3) as usize).min(max_tokens.max(ideal));

        let units = self.pack_units(chapter_text, high, ideal, model);
        let mut texts: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut current_tokens = 0usize;

        for unit in units {
            if current_tokens > 0 && current_tokens + unit.tokens > high {
                texts.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            if !current.is_empty() {
                current.push_str(if unit.paragraph { "\n\n" } else { " " });
            }
            current.push_str(&unit.text);
            current_tokens += unit.tokens;
        }
        if !current.is_empty() {
            texts.push(current);
        }

        // A short trailing chunk folds into its predecessor when that stays
        // within the embedding limit
        if texts.len() >= 2 {
            let last_tokens = self.counter.count(&texts[texts.len() - 1], model);
            if last_tokens < min {
                let previous_tokens = self.counter.count(&texts[texts.len() - 2], model);
                if previous_tokens + last_tokens <= max_tokens {
                    let tail = texts.pop().unwrap_or_default();
                    if let Some(previous) = texts.last_mut() {
                        previous.push_str("\n\n");
                        previous.push_str(&tail);
                    }
                }
            }
        }

        texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| SplitChunk {
                kind: ChunkKind::Excerpt,
                text,
                order_in_chapter: Some(index as i32 + 1),
            })
            .collect()
    }

    /// Explode a chapter into packable units: whole paragraphs when they fit
    /// the window, sentences when they do not, hard character cuts when even
    /// one sentence exceeds the window.
    fn pack_units(
        &self,
        text: &str,
        high: usize,
        ideal: usize,
        model: &str,
    ) -> Vec<PackUnit> {
        let mut units = Vec::new();

        for paragraph in split_paragraphs(text) {
            let tokens = self.counter.count(&paragraph, model);
            if tokens <= high {
                units.push(PackUnit {
                    text: paragraph,
                    tokens,
                    paragraph: true,
                });
                continue;
            }

            let sentences = split_sentences(&paragraph);
            let count = sentences.len();
            for (index, sentence) in sentences.into_iter().enumerate() {
                let tokens = self.counter.count(&sentence, model);
                let is_last = index + 1 == count;
                if tokens <= high {
                    units.push(PackUnit {
                        text: sentence,
                        tokens,
                        paragraph: is_last,
                    });
                    continue;
                }

                // Hard cut in ideal-sized pieces
                let piece_chars = ideal.saturating_mul(4).max(1);
                let chars: Vec<char> = sentence.chars().collect();
                let pieces = chars.chunks(piece_chars).collect::<Vec<_>>();
                let piece_count = pieces.len();
                for (piece_index, piece) in pieces.into_iter().enumerate() {
                    let piece_text: String = piece.iter().collect();
                    let tokens = self.counter.count(&piece_text, model);
                    units.push(PackUnit {
                        text: piece_text,
                        tokens,
                        paragraph: is_last && piece_index + 1 == piece_count,
                    });
                }
            }
        }

        units
    }

    /// Recursive oversize subsplit: deeper markdown headings first, then
    /// paragraph packing, then sentence packing.
    fn subsplit(
        &self,
        title: &str,
        body: &str,
        target: usize,
        md_level: usize,
        model: &str,
    ) -> Vec<(String, String)> {
        // Deeper heading levels inside this chapter
        for level in md_level..=6 {
            let lines: Vec<&str> = body.lines().collect();
            if has_heading_of_level(&lines, level) {
                let sections = split_by_style(&lines, TitleStyle::Markdown { level });
                let mut out = Vec::new();
                for (section_title, section_body) in sections {
                    let tokens = self.counter.count(&section_body, model);
                    if tokens > target {
                        out.extend(self.subsplit(
                            &section_title,
                            &section_body,
                            target,
                            level + 1,
                            model,
                        ));
                    } else {
                        out.push((section_title, section_body));
                    }
                }
                return out;
            }
        }

        // Paragraph packing
        let paragraphs = split_paragraphs(body);
        if paragraphs.len() > 1 {
            let mut groups: Vec<String> = Vec::new();
            let mut current = String::new();
            let mut current_tokens = 0usize;
            for paragraph in paragraphs {
                let tokens = self.counter.count(&paragraph, model);
                if current_tokens > 0 && current_tokens + tokens > target {
                    groups.push(std::mem::take(&mut current));
                    current_tokens = 0;
                }
                if !current.is_empty() {
                    current.push_str("\n\n");
                }
                current.push_str(&paragraph);
                current_tokens += tokens;
            }
            if !current.is_empty() {
                groups.push(current);
            }

            return self.title_parts(title, groups, target, model);
        }

        // A single oversized paragraph: pack sentences
        let sentences = split_sentences(body);
        if sentences.len() > 1 {
            let mut groups: Vec<String> = Vec::new();
            let mut current = String::new();
            let mut current_tokens = 0usize;
            for sentence in sentences {
                let tokens = self.counter.count(&sentence, model);
                if current_tokens > 0 && current_tokens + tokens > target {
                    groups.push(std::mem::take(&mut current));
                    current_tokens = 0;
                }
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(&sentence);
                current_tokens += tokens;
            }
            if !current.is_empty() {
                groups.push(current);
            }

            return self.title_parts(title, groups, target, model);
        }

        // Nothing below sentence granularity at chapter level
        vec![(title.to_string(), body.to_string())]
    }

    fn title_parts(
        &self,
        title: &str,
        groups: Vec<String>,
        target: usize,
        model: &str,
    ) -> Vec<(String, String)> {
        if groups.len() == 1 {
            let body = groups.into_iter().next().unwrap_or_default();
            let tokens = self.counter.count(&body, model);
            if tokens > target {
                return self.subsplit(title, &body, target, 7, model);
            }
            return vec![(title.to_string(), body)];
        }

        groups
            .into_iter()
            .enumerate()
            .map(|(index, body)| (format!("{} (part {})", title, index + 1), body))
            .collect()
    }
}

/// Whitespace normalization plus consecutive-duplicate paragraph collapse
pub fn normalize_document(text: &str) -> String {
    let normalized = normalize_whitespace(text);
    let paragraphs = collapse_repeated_paragraphs(split_paragraphs(&normalized));
    paragraphs.join("\n\n")
}

fn detect_style(lines: &[&str], class: ContentClass) -> Option<TitleStyle> {
    // Markdown headings take precedence; the shallowest level splits
    let min_level = lines
        .iter()
        .filter_map(|line| MD_HEADING.captures(line))
        .map(|c| c[1].len())
        .min();
    if let Some(level) = min_level {
        return Some(TitleStyle::Markdown { level });
    }

    let numbered = lines
        .iter()
        .filter(|line| is_numbered_title(line))
        .count();
    if numbered >= 2 {
        return Some(TitleStyle::Numbered);
    }

    if lines.iter().any(|line| is_all_caps_title(line)) {
        return Some(TitleStyle::AllCaps);
    }

    if class == ContentClass::Legal && lines.iter().any(|line| NORMATIVE_HEADING.is_match(line)) {
        return Some(TitleStyle::Normative);
    }

    None
}

fn is_numbered_title(line: &str) -> bool {
    NUMBERED_HEADING.is_match(line) && line.chars().count() <= MAX_NUMBERED_TITLE_CHARS
}

fn has_heading_of_level(lines: &[&str], level: usize) -> bool {
    lines
        .iter()
        .filter_map(|line| MD_HEADING.captures(line))
        .any(|c| c[1].len() == level)
}

/// Extract the title from a matched heading line
fn title_of(line: &str, style: TitleStyle) -> Option<String> {
    match style {
        TitleStyle::Markdown { level } => MD_HEADING.captures(line).and_then(|c| {
            if c[1].len() == level {
                Some(c[2].trim().to_string())
            } else {
                None
            }
        }),
        TitleStyle::Numbered => {
            if is_numbered_title(line) {
                Some(line.trim().to_string())
            } else {
                None
            }
        }
        TitleStyle::AllCaps => {
            if is_all_caps_title(line) {
                Some(line.trim().to_string())
            } else {
                None
            }
        }
        TitleStyle::Normative => {
            if NORMATIVE_HEADING.is_match(line) {
                Some(line.trim().to_string())
            } else {
                None
            }
        }
    }
}

/// Partition lines into (title, body) chapters. The title line stays inside
/// the body so chapter concatenation reconstructs the document.
fn split_by_style(lines: &[&str], style: TitleStyle) -> Vec<(String, String)> {
    let mut chapters: Vec<(String, Vec<&str>)> = Vec::new();
    let mut current_title: Option<String> = None;
    let mut current_lines: Vec<&str> = Vec::new();

    for line in lines {
        if let Some(title) = title_of(line, style) {
            if !current_lines.is_empty() || current_title.is_some() {
                chapters.push((
                    current_title.take().unwrap_or_else(|| "Preamble".to_string()),
                    std::mem::take(&mut current_lines),
                ));
            }
            current_title = Some(title);
        }
        current_lines.push(line);
    }
    if !current_lines.is_empty() {
        chapters.push((
            current_title.unwrap_or_else(|| "Preamble".to_string()),
            current_lines,
        ));
    }

    chapters
        .into_iter()
        .map(|(title, lines)| (title, lines.join("\n").trim().to_string()))
        .filter(|(_, body)| !body.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::fold_for_comparison;

    fn splitter() -> TextSplitter {
        TextSplitter::new(SplitterConfig::default(), TokenCounter::heuristic())
    }

    fn word_text(words: usize) -> String {
        // "word " is 5 chars, so roughly 1.19 tokens per word under the
        // 4.2 chars/token heuristic
        vec!["word"; words].join(" ")
    }

    #[test]
    fn test_markdown_chapters() {
        let splitter = splitter();
        let text = "intro before any heading\n\n# Alpha\n\nalpha body\n\n# Beta\n\nbeta body";
        let chapters = splitter.split_chapters(text, ContentClass::Generic, "m");

        assert_eq!(chapters.len(), 3);
        assert_eq!(chapters[0].title, "Preamble");
        assert_eq!(chapters[1].title, "Alpha");
        assert_eq!(chapters[2].title, "Beta");
        assert_eq!(chapters[0].order_in_document, 0);
        assert_eq!(chapters[2].order_in_document, 2);
    }

    #[test]
    fn test_shallowest_heading_level_wins() {
        let splitter = splitter();
        let text = "## Section one\n\nbody\n\n# Top\n\ntop body\n\n## Section two\n\nmore";
        let chapters = splitter.split_chapters(text, ContentClass::Generic, "m");

        // Level 1 is the split level; level-2 headings stay inside chapters
        let titles: Vec<&str> = chapters.iter().map(|c| c.title.as_str()).collect();
        assert!(titles.contains(&"Top"));
        assert!(!titles.contains(&"Section two"));
    }

    #[test]
    fn test_token_ranges_are_contiguous() {
        let splitter = splitter();
        let text = format!(
            "# A\n\n{}\n\n# B\n\n{}",
            word_text(100),
            word_text(150)
        );
        let chapters = splitter.split_chapters(&text, ContentClass::Generic, "m");

        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].token_start, 0);
        assert_eq!(chapters[0].token_end, chapters[0].token_count);
        assert_eq!(chapters[1].token_start, chapters[0].token_end);
        assert_eq!(
            chapters[1].token_end - chapters[1].token_start,
            chapters[1].token_count
        );
    }

    #[test]
    fn test_concatenation_reconstructs_normalized_text() {
        let splitter = splitter();
        let text = "lead in\n\n# One\n\nfirst body\n\nfirst body\n\n# Two\n\nsecond  body";
        let chapters = splitter.split_chapters(text, ContentClass::Generic, "m");

        let rebuilt = chapters
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        // Duplicate paragraph was collapsed, whitespace normalized
        assert_eq!(normalize_document(&rebuilt), normalize_document(text));
        assert!(!normalize_document(text).contains("first body\n\nfirst body"));
    }

    #[test]
    fn test_oversized_chapter_subsplit_on_paragraphs() {
        let config = SplitterConfig::default();
        let splitter = TextSplitter::new(config, TokenCounter::heuristic());

        // Legal target is 1500 tokens; build a chapter around 4x that
        let paragraph = word_text(400);
        let body: Vec<String> = (0..12).map(|_| paragraph.clone()).collect();
        let text = format!("TÍTULO I\n{}", body.join("\n\n"));

        let chapters = splitter.split_chapters(&text, ContentClass::Legal, "m");
        assert!(chapters.len() > 1, "oversized chapter must be subsplit");
        for chapter in &chapters {
            assert!(chapter.token_count <= 1_500);
        }
        // Part naming preserves the original title
        assert!(chapters[0].title.starts_with("TÍTULO I"));
    }

    #[test]
    fn test_small_chapter_single_chapter_chunk() {
        let splitter = splitter();
        let chunks = splitter.split_chunks("a short chapter body", 8192, "m");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Chapter);
        assert!(chunks[0].order_in_chapter.is_none());
    }

    #[test]
    fn test_large_chapter_excerpt_chunks() {
        let splitter = splitter();
        // ~5000 tokens worth of text in 50 paragraphs
        let paragraph = word_text(85);
        let text: Vec<String> = (0..50).map(|_| paragraph.clone()).collect();
        let text = text.join("\n\n");

        let chunks = splitter.split_chunks(&text, 8192, "m");
        assert!(chunks.len() >= 8, "got {} chunks", chunks.len());

        let mut previous = 0;
        for chunk in &chunks {
            assert_eq!(chunk.kind, ChunkKind::Excerpt);
            let order = chunk.order_in_chapter.unwrap();
            assert!(order > previous, "orders must strictly increase");
            previous = order;

            let tokens = TokenCounter::heuristic().count(&chunk.text, "m");
            assert!(tokens <= 8192);
        }
        assert_eq!(chunks[0].order_in_chapter, Some(1));
    }

    #[test]
    fn test_chunks_respect_embedding_limit() {
        let splitter = splitter();
        // One giant paragraph without sentence breaks forces hard cuts
        let text = "x".repeat(40_000);
        let chunks = splitter.split_chunks(&text, 512, "m");

        for chunk in &chunks {
            let tokens = TokenCounter::heuristic().count(&chunk.text, "m");
            assert!(tokens <= 512, "chunk of {} tokens exceeds limit", tokens);
        }
    }

    #[test]
    fn test_trailing_chunk_merges_into_previous() {
        let splitter = splitter();
        // 512-token window plus a tiny tail paragraph
        let text = format!("{}\n\n{}", word_text(430), "tiny tail.");
        let chunks = splitter.split_chunks(&text, 8192, "m");

        // The tail is under the 256-token minimum, so it must not stand alone
        let last = chunks.last().unwrap();
        let tokens = TokenCounter::heuristic().count(&last.text, "m");
        assert!(tokens >= 256 || chunks.len() == 1);
    }

    #[test]
    fn test_numbered_style() {
        let splitter = splitter();
        let text = "1 Introduction\ncontent of one\n\n2 Methods\ncontent of two";
        let chapters = splitter.split_chapters(text, ContentClass::Article, "m");

        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "1 Introduction");
        assert_eq!(chapters[1].title, "2 Methods");
    }

    #[test]
    fn test_normative_style_for_legal_class() {
        let splitter = splitter();
        let text = "Seção I disposições gerais\nbody one\n\nSeção II das penas\nbody two";

        // Only one all-caps/numbered candidate line, so the legal class
        // reaches the normative matcher
        let chapters = splitter.split_chapters(text, ContentClass::Legal, "m");
        assert_eq!(chapters.len(), 2);
        assert!(fold_for_comparison(&chapters[0].title).starts_with("secao i"));

        // Outside the legal class the same text is one chapter
        let generic = splitter.split_chapters(text, ContentClass::Generic, "m");
        assert_eq!(generic.len(), 1);
        assert_eq!(generic[0].title, "Preamble");
    }

    #[test]
    fn test_empty_document() {
        let splitter = splitter();
        assert!(splitter
            .split_chapters("", ContentClass::Generic, "m")
            .is_empty());
        assert!(splitter
            .split_chapters("   \n\n  ", ContentClass::Generic, "m")
            .is_empty());
    }

    #[test]
    fn test_never_fails_on_unstructured_text() {
        let splitter = splitter();
        let chapters = splitter.split_chapters(
            "just prose with no structure at all",
            ContentClass::Generic,
            "m",
        );
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "Preamble");
    }
}
