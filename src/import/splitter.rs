//! Heading-based chapter splitting and designator parsing
//!
//! Splits a parsed manuscript into chapter candidates at heading
//! boundaries. Heading text such as "Chapter 3: The Return" carries a
//! numeric designator; the same parser doubles as the filename heuristic
//! for documents whose content gives no chapter structure.

use once_cell::sync::Lazy;
use regex::Regex;

use super::docx::DocBlock;
use super::text::word_count;
use super::types::ChapterCandidate;

/// Title used when a document has no headings and no usable filename
pub const FALLBACK_TITLE: &str = "Imported Chapter";

/// "Chapter 3", "Ch. 3", "Part 3", "Episode 3", optional ": Title" tail
static KEYWORD_DESIGNATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:chapter|ch\.?|part|episode)\s*(\d+(?:\.\d+)?)\s*[:.\-–—]?\s*(.*)$")
        .expect("keyword designator pattern")
});

/// "12. Title", "3 - Title": a bare number with an explicit separator
static NUMBERED_DESIGNATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)?)\s*[:.\-–—)\]]\s*(.*)$").expect("numbered designator pattern")
});

static BARE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(?:\.\d+)?$").expect("bare number pattern"));

/// Result of splitting one document into candidates
#[derive(Debug, Clone, Default)]
pub struct SplitResult {
    pub candidates: Vec<ChapterCandidate>,
    pub warnings: Vec<String>,
    /// False when the whole document collapsed into the no-heading fallback
    pub used_headings: bool,
}

/// Partition parsed blocks into chapter candidates
///
/// Every heading opens a new candidate that consumes paragraphs until the
/// next heading. A heading only counts when both its title and its body
/// end up non-empty; failing either, the heading and its section are
/// dropped with a warning. Without any headings the whole document becomes
/// one untitled candidate.
pub fn split_chapters(blocks: &[DocBlock]) -> SplitResult {
    let mut result = SplitResult::default();

    let has_headings = blocks.iter().any(|b| matches!(b, DocBlock::Heading { .. }));
    if !has_headings {
        let body = render_body(blocks.iter());
        if !body.is_empty() {
            result.candidates.push(candidate(None, FALLBACK_TITLE, body));
        }
        return result;
    }

    result.used_headings = true;

    let mut preamble_paragraphs = 0usize;
    let mut current: Option<(Option<f64>, String)> = None;
    let mut section: Vec<&DocBlock> = Vec::new();

    let flush = |current: &mut Option<(Option<f64>, String)>,
                 section: &mut Vec<&DocBlock>,
                 result: &mut SplitResult| {
        if let Some((number, title)) = current.take() {
            let body = render_body(section.iter().copied());
            if title.is_empty() {
                result
                    .warnings
                    .push("a heading with no text was skipped, along with its section".to_string());
            } else if body.is_empty() {
                result
                    .warnings
                    .push(format!("\"{}\" had no body content and was skipped", title));
            } else {
                result.candidates.push(candidate(number, &title, body));
            }
        }
        section.clear();
    };

    for block in blocks {
        match block {
            DocBlock::Heading { text, .. } => {
                flush(&mut current, &mut section, &mut result);
                let (number, title) = parse_designator(text);
                current = Some((number, title));
            }
            DocBlock::Paragraph { .. } => {
                if current.is_some() {
                    section.push(block);
                } else {
                    preamble_paragraphs += 1;
                }
            }
        }
    }
    flush(&mut current, &mut section, &mut result);

    if preamble_paragraphs > 0 {
        result.warnings.push(format!(
            "{} paragraph(s) before the first heading were discarded",
            preamble_paragraphs
        ));
    }

    result
}

/// Extract a chapter number and title from heading or filename text
///
/// When the text after the designator is empty the full text serves as
/// the title, so "Chapter 3" keeps a readable name.
pub fn parse_designator(text: &str) -> (Option<f64>, String) {
    let trimmed = text.trim();

    for pattern in [&*KEYWORD_DESIGNATOR, &*NUMBERED_DESIGNATOR] {
        if let Some(caps) = pattern.captures(trimmed) {
            if let Some(number) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) {
                let title = clean_title(caps.get(2).map(|m| m.as_str()).unwrap_or(""));
                let title = if title.is_empty() {
                    trimmed.to_string()
                } else {
                    title
                };
                return (Some(number), title);
            }
        }
    }

    if BARE_NUMBER.is_match(trimmed) {
        if let Ok(number) = trimmed.parse::<f64>() {
            return (Some(number), trimmed.to_string());
        }
    }

    (None, trimmed.to_string())
}

/// Designator parse over a filename, extension stripped first
///
/// Returns the number (if any) and a title; the title may be empty for
/// degenerate names like ".docx".
pub fn filename_hint(filename: &str) -> (Option<f64>, String) {
    let stem = match filename.rsplit_once('.') {
        Some((stem, _ext)) => stem,
        None => filename,
    };
    let stem = stem.trim();
    if stem.is_empty() {
        return (None, String::new());
    }
    parse_designator(stem)
}

fn clean_title(raw: &str) -> String {
    raw.trim()
        .trim_start_matches(|c: char| {
            matches!(c, '-' | ':' | '.' | '–' | '—') || c.is_whitespace()
        })
        .trim()
        .to_string()
}

fn candidate(number: Option<f64>, title: &str, body: String) -> ChapterCandidate {
    let words = word_count(&body);
    ChapterCandidate {
        number,
        title: title.to_string(),
        body,
        word_count: words,
        image_count: 0,
    }
}

fn render_body<'a>(blocks: impl Iterator<Item = &'a DocBlock>) -> String {
    let paragraphs: Vec<String> = blocks
        .filter_map(|block| match block {
            DocBlock::Paragraph { html } => Some(format!("<p>{}</p>", html)),
            DocBlock::Heading { .. } => None,
        })
        .collect();
    paragraphs.join("\n")
}
