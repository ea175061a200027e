//! Plain-text helpers for chapter bodies and titles

use super::types::WORDS_PER_MINUTE;

/// Turn a chapter title into a URL-safe slug
///
/// Lowercases, keeps alphanumerics, folds everything else into single
/// hyphens. Falls back to `chapter-<number>` when nothing survives.
pub fn slugify(title: &str, chapter_number: f64) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_was_hyphen = true;

    for c in title.chars() {
        if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                slug.push(lower);
            }
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }

    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        format!("chapter-{}", format_number(chapter_number))
    } else {
        slug
    }
}

/// Render a chapter number without a trailing `.0` for whole values
pub fn format_number(number: f64) -> String {
    if number.fract() == 0.0 {
        format!("{}", number as i64)
    } else {
        format!("{}", number)
    }
}

/// Strip markup tags, leaving text content separated by spaces
pub fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;

    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                // Tag boundaries separate words ("<p>one</p><p>two</p>")
                text.push(' ');
            }
            '>' => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    text
}

/// Count words in chapter body markup
pub fn word_count(html: &str) -> i64 {
    strip_tags(html).split_whitespace().count() as i64
}

/// Estimated reading time in minutes: ceiling of words / reading speed
pub fn reading_time_minutes(words: i64) -> i64 {
    (words + WORDS_PER_MINUTE - 1) / WORDS_PER_MINUTE
}
