//! Candidate name normalization.

use std::sync::LazyLock;

use regex::Regex;

/// Leading words that label a name as a domain rather than being part of it.
pub const MARKERS: [&str; 3] = ["domain", "subsystem", "module"];

/// Per marker: `marker` followed by `:`/`-`, then `marker` followed by whitespace.
static MARKER_PATTERNS: LazyLock<Vec<(Regex, Regex)>> = LazyLock::new(|| {
    MARKERS
        .iter()
        .filter_map(|marker| {
            let marker = regex::escape(marker);
            let punct = Regex::new(&format!(r"^{marker}\s*[:\-]\s*")).ok()?;
            let space = Regex::new(&format!(r"^{marker}\s+")).ok()?;
            Some((punct, space))
        })
        .collect()
});

/// Canonicalize a candidate name into its comparison key.
///
/// Lower-cases and trims, strips a leading marker word, strips residual
/// `-`/`:`/space at either end, and collapses whitespace runs.
pub fn normalize_name(text: &str) -> String {
    let mut cleaned = text.trim().to_lowercase();
    for (punct, space) in MARKER_PATTERNS.iter() {
        cleaned = punct.replace(&cleaned, "").into_owned();
        cleaned = space.replace(&cleaned, "").into_owned();
    }
    cleaned
        .trim_matches(|c| matches!(c, '-' | ':' | ' '))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
