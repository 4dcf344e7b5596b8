//! Text preparation for speech: markdown stripping and sentence-unit splitting.
//!
//! Pure functions, no I/O.

use regex::Regex;
use std::sync::LazyLock;

// Compiled once, reused across calls.
static RE_FENCED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static RE_INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").unwrap());
static RE_BOLD_ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*\*([^*\n]+)\*\*\*").unwrap());
static RE_BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*\n]+)\*\*").unwrap());
static RE_ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*\n]+)\*").unwrap());
static RE_UNDERSCORE_BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__([^_\n]+)__").unwrap());
static RE_UNDERSCORE_ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_([^_\n]+)_").unwrap());
static RE_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#+[ \t]?").unwrap());
static RE_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]\n]*\]\([^)\n]*\)").unwrap());
static RE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap());
static RE_BLOCKQUOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*>+[ \t]?").unwrap());
static RE_BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*[-*+][ \t]+").unwrap());
static RE_NUMBERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*\d+\.[ \t]+").unwrap());
static RE_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").unwrap());
static RE_SENTENCE_UNIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?]+[.!?]?").unwrap());

/// Strip markdown formatting so a reply reads naturally when spoken.
///
/// Passes are applied in a fixed order: fenced code blocks are dropped, inline
/// code and emphasis keep their inner text, heading/blockquote/list markers
/// and images are removed, links keep their label. Whitespace runs collapse
/// to a single space and the result is trimmed. Anything that does not match
/// a pattern is left untouched.
pub fn normalize(markdown: &str) -> String {
    let mut c = RE_FENCED_CODE.replace_all(markdown, "").into_owned();
    c = RE_INLINE_CODE.replace_all(&c, "$1").into_owned();

    // Longest marker first so `***x***` doesn't leave stray asterisks.
    c = RE_BOLD_ITALIC.replace_all(&c, "$1").into_owned();
    c = RE_BOLD.replace_all(&c, "$1").into_owned();
    c = RE_ITALIC.replace_all(&c, "$1").into_owned();
    c = RE_UNDERSCORE_BOLD.replace_all(&c, "$1").into_owned();
    c = RE_UNDERSCORE_ITALIC.replace_all(&c, "$1").into_owned();

    c = RE_HEADING.replace_all(&c, "").into_owned();
    c = RE_IMAGE.replace_all(&c, "").into_owned();
    c = RE_LINK.replace_all(&c, "$1").into_owned();
    c = RE_BLOCKQUOTE.replace_all(&c, "").into_owned();
    c = RE_BULLET.replace_all(&c, "").into_owned();
    c = RE_NUMBERED.replace_all(&c, "").into_owned();
    c = RE_WHITESPACE.replace_all(&c, " ").into_owned();

    c.trim().to_string()
}

/// Split normalized text into sentence units for sequential playback.
///
/// A unit is a run of text ending in `.`, `!` or `?`; a trailing fragment
/// without terminal punctuation is its own unit. Units are trimmed and empty
/// ones dropped. Text made only of punctuation is kept as a single unit.
pub fn split_utterances(text: &str) -> Vec<String> {
    let units: Vec<String> = RE_SENTENCE_UNIT
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if units.is_empty() {
        let whole = text.trim();
        if whole.is_empty() {
            return Vec::new();
        }
        return vec![whole.to_string()];
    }

    units
}
