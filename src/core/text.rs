//! Text utilities shared by the loader, validator, and evidence index.

use std::sync::LazyLock;

use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

#[allow(clippy::expect_used)]
static CONTROL_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F-\x9F]").expect("valid control-char regex")
});

#[allow(clippy::expect_used)]
static INLINE_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{00A0}]+").expect("valid inline-space regex"));

#[allow(clippy::expect_used)]
static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("valid blank-line regex"));

/// Collapses every run of whitespace (including newlines) into one space
/// and trims the ends.
#[must_use]
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case- and whitespace-insensitive key used for merging by name.
#[must_use]
pub fn normalize_key(s: &str) -> String {
    normalize_whitespace(s).to_lowercase()
}

/// Removes control characters and collapses runs of inline spaces and
/// blank lines, keeping paragraph breaks.
#[must_use]
pub fn clean_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let text = CONTROL_CHARS.replace_all(&text, "");
    let text = INLINE_SPACE.replace_all(&text, " ");
    let text = BLANK_LINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Splits text into trimmed, non-empty sentences.
///
/// Paragraph breaks always end a sentence so that headings and list items
/// without terminal punctuation do not merge into the following sentence.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    text.split("\n\n")
        .flat_map(|para| para.lines())
        .flat_map(UnicodeSegmentation::unicode_sentences)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// A document with its whitespace-normalized form, for verbatim checks.
#[derive(Debug, Clone)]
pub struct VerbatimText {
    normalized: String,
}

impl VerbatimText {
    /// Normalizes `text` once for repeated substring checks.
    #[must_use]
    pub fn new(text: &str) -> Self {
        Self {
            normalized: normalize_whitespace(text),
        }
    }

    /// Returns `true` if `span` occurs in the document byte-for-byte,
    /// modulo whitespace normalization. Empty spans never match.
    #[must_use]
    pub fn contains(&self, span: &str) -> bool {
        let span = normalize_whitespace(span);
        !span.is_empty() && self.normalized.contains(&span)
    }
}

/// Truncates `text` to at most `max_bytes`, cutting at the last sentence
/// boundary that fits. Returns the text unchanged when it already fits.
#[must_use]
pub fn truncate_at_sentence(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = 0;
    for (offset, sentence) in text.split_sentence_bound_indices() {
        let next = offset + sentence.len();
        if next > max_bytes {
            break;
        }
        end = next;
    }
    if end == 0 {
        let mut cut = max_bytes;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        end = cut;
    }
    text[..end].trim_end()
}

/// De-duplicates strings by normalized key, keeping first occurrences and
/// dropping blanks.
#[must_use]
pub fn dedup_strings(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(normalize_key(s)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \n\t b  c "), "a b c");
        assert_eq!(normalize_key("High  Intensity\nStatin"), "high intensity statin");
    }

    #[test]
    fn test_clean_text() {
        let raw = "Title\r\n\r\n\r\n\r\nFirst\u{0007}   line.\t\tSecond.";
        assert_eq!(clean_text(raw), "Title\n\nFirst line. Second.");
    }

    #[test]
    fn test_split_sentences() {
        let text = "Lipid management\n\nPatients with LDL-C ≥190mg/dL should receive high-intensity statin therapy. Review annually.";
        let sentences = split_sentences(text);
        assert_eq!(
            sentences,
            vec![
                "Lipid management",
                "Patients with LDL-C ≥190mg/dL should receive high-intensity statin therapy.",
                "Review annually.",
            ]
        );
    }

    #[test]
    fn test_verbatim_contains() {
        let doc = VerbatimText::new("Offer atorvastatin\n 20 mg   daily. Stop if ALT rises.");
        assert!(doc.contains("Offer atorvastatin 20 mg daily."));
        assert!(doc.contains("  Stop if ALT\nrises. "));
        assert!(!doc.contains("Offer rosuvastatin 20 mg daily."));
        assert!(!doc.contains("   "));
    }

    #[test]
    fn test_truncate_at_sentence() {
        let text = "One two. Three four. Five six.";
        assert_eq!(truncate_at_sentence(text, 100), text);
        assert_eq!(truncate_at_sentence(text, 21), "One two. Three four.");
        assert_eq!(truncate_at_sentence(text, 3), "One");
    }

    #[test]
    fn test_dedup_strings() {
        let items = vec![
            "LDL-C ≥190mg/dL".to_string(),
            " ldl-c  ≥190MG/dl ".to_string(),
            String::new(),
            "Age 40-75".to_string(),
        ];
        assert_eq!(dedup_strings(items), vec!["LDL-C ≥190mg/dL", "Age 40-75"]);
    }
}
