use std::sync::LazyLock;

use regex::Regex;

/// Boundary phrases in priority order. The first pattern that matches
/// anywhere on the page wins, regardless of where on the page it sits.
static HEADER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)Two Little Hands",
        r"(?i)Parts of the Body",
        r"(?i)Let us [A-Za-z]+",
        r"(?i)Picture\s+Talk",
        r"(?i)Picture\s+Time",
        r"(?i)Sight words",
        r"(?i)New words",
        r"(?i)Alphabet song",
        r"(?i)Letter sounds",
        r"(?i)Odd One Out",
        r"(?i)Note to the teacher",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Headings that extend the open topic instead of starting a new one.
const CONTINUATION_MARKERS: &[&str] = &["sight words", "new words", "note to the teacher"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Starter,
    Continuation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMatch {
    /// Matched text as it appears on the page, trimmed.
    pub phrase: String,
    /// Lower-cased `phrase`, used for classification only.
    pub normalized: String,
}

impl HeaderMatch {
    pub fn boundary(&self) -> Boundary {
        if CONTINUATION_MARKERS.contains(&self.normalized.as_str()) {
            Boundary::Continuation
        } else {
            Boundary::Starter
        }
    }
}

/// Look for a boundary phrase in one page's text.
pub fn match_header(text: &str) -> Option<HeaderMatch> {
    if text.trim().is_empty() {
        return None;
    }
    HEADER_PATTERNS.iter().find_map(|re| {
        let phrase = re.find(text)?.as_str().trim().to_string();
        let normalized = phrase.to_lowercase();
        Some(HeaderMatch { phrase, normalized })
    })
}
