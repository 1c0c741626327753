//! Text normalization for feedback records.
//!
//! Everything here is pure: the same record and options always give the
//! same output. Records whose text cannot be salvaged are dropped and logged.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::record::{CleanedRecord, FeedbackRecord};

/// UTF-8 text that was decoded as Windows-1252 somewhere upstream.
static MOJIBAKE: &[(&str, &str)] = &[
    ("â€™", "'"),
    ("â€˜", "'"),
    ("â€œ", "\""),
    ("â€\u{9d}", "\""),
    ("â€“", "-"),
    ("â€”", "-"),
    ("â€¦", "..."),
    ("Ã©", "é"),
    ("Ã¨", "è"),
    ("Ã¡", "á"),
    ("Ã³", "ó"),
    ("Ã±", "ñ"),
    ("Ã¼", "ü"),
    ("Ã¶", "ö"),
    ("Ã¤", "ä"),
    ("Â ", " "),
];

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9-]+(?:\.[a-z0-9-]+)*\.[a-z]{2,}\b")
        .expect("email pattern is valid")
});

/// Optional country code, optional area code (bracketed or not), then a
/// 3-4 digit block and a 4 digit block. Separators are space, dot or dash.
/// ISO dates end in a 2 digit block and never match.
static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{2,4}\)\s?|\b\d{2,4}[\s.-])?\b\d{3,4}[\s.-]\d{4}\b")
        .expect("phone pattern is valid")
});

/// Cell values spreadsheet exports use for "no answer".
static NULL_PLACEHOLDERS: &[&str] = &["n/a", "na", "nan", "none", "null", "-", "--"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessOptions {
    /// Replace e-mail addresses and phone numbers with placeholders.
    pub redact_pii: bool,
    /// Drop texts shorter than this many characters after cleaning.
    pub min_chars: usize,
    /// Truncate longer texts to this many characters.
    pub max_chars: Option<usize>,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            redact_pii: true,
            min_chars: 1,
            max_chars: Some(4000),
        }
    }
}

/// Output of [`preprocess`].
#[derive(Debug, Default)]
pub struct Preprocessed {
    pub records: Vec<CleanedRecord>,
    pub dropped: usize,
}

/// Cleans every record, keeping input order and dropping unusable ones.
#[tracing::instrument(skip_all, fields(records = records.len()))]
pub fn preprocess(records: &[FeedbackRecord], options: &PreprocessOptions) -> Preprocessed {
    let mut out = Preprocessed::default();

    for record in records {
        match clean_text(&record.raw_text, options) {
            Some(normalized_text) => out.records.push(CleanedRecord {
                record: record.clone(),
                normalized_text,
            }),
            None => {
                debug!(
                    record_id = record.record_id,
                    student_id = %record.student_id,
                    "Dropping record with empty or uninterpretable text"
                );
                out.dropped += 1;
            }
        }
    }

    info!(kept = out.records.len(), dropped = out.dropped, "Preprocessing complete");
    out
}

/// Normalizes one text. Returns `None` when nothing usable remains.
pub fn clean_text(raw: &str, options: &PreprocessOptions) -> Option<String> {
    let fixed = fix_encoding(raw);
    let collapsed = collapse_whitespace(&fixed);

    let redacted = if options.redact_pii {
        redact_pii(&collapsed)
    } else {
        collapsed
    };

    let text = match options.max_chars {
        Some(max) => truncate_chars(&redacted, max),
        None => redacted,
    };

    if !is_interpretable(&text) || text.chars().count() < options.min_chars {
        return None;
    }
    Some(text)
}

fn fix_encoding(raw: &str) -> String {
    let mut text = raw.trim_start_matches('\u{feff}').to_string();

    for (broken, fixed) in MOJIBAKE {
        if text.contains(broken) {
            text = text.replace(broken, fixed);
        }
    }

    text.chars()
        .filter_map(|c| match c {
            '\u{FFFD}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{feff}' => None,
            '\u{00A0}' => Some(' '),
            '\u{2018}' | '\u{2019}' => Some('\''),
            '\u{201C}' | '\u{201D}' => Some('"'),
            c if c.is_control() && !c.is_whitespace() => None,
            c => Some(c),
        })
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn redact_pii(text: &str) -> String {
    let text = EMAIL.replace_all(text, "[email]");
    PHONE.replace_all(&text, "[phone]").into_owned()
}

fn is_interpretable(text: &str) -> bool {
    if text.is_empty() || NULL_PLACEHOLDERS.contains(&text.to_lowercase().as_str()) {
        return false;
    }
    text.chars().any(char::is_alphanumeric)
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}
