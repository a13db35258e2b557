//! Title/artist normalization.
//!
//! Equivalent tracks arrive from the catalog under slightly different
//! spellings ("Song (feat. X)", "song feat. x", "Song  [Remastered]" with
//! stray punctuation). Normalization folds these onto one canonical form so
//! cache keys converge.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Featuring-marker tails: "feat. X", "ft X", "featuring X", with or
    /// without surrounding parentheses/brackets, through end of string.
    static ref FEATURE_SUFFIX: Regex =
        Regex::new(r"(?i)[\(\[]?\s*(?:feat\.?|ft\.?|featuring)\s+[^\)\]]*[\)\]]?\s*$").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Normalize a title or artist string for identity comparison.
///
/// Case-folds, drops featuring-marker suffixes, strips punctuation and
/// collapses whitespace. The result is what cache keys and match queries
/// are built from.
pub fn normalize_text(input: &str) -> String {
    let lowered = input.to_lowercase();
    let without_features = FEATURE_SUFFIX.replace(&lowered, "");

    let stripped: String = without_features
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}
