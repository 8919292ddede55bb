//! Artist and track name normalization and trigram similarity.

use std::collections::HashSet;

const LEADING_ARTICLES: [&str; 3] = ["the ", "a ", "an "];

/// Lowercases, drops a leading article and keeps only alphanumeric characters.
///
/// `"The Beatles'"` and `"beatles"` both normalize to `"beatles"`. The article is
/// kept when it is the whole name (`"The The"` becomes `"the"`).
pub fn normalize_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let stripped = LEADING_ARTICLES
        .iter()
        .find_map(|article| lowered.strip_prefix(article))
        .filter(|rest| rest.chars().any(char::is_alphanumeric))
        .unwrap_or(&lowered);
    stripped.chars().filter(|c| c.is_alphanumeric()).collect()
}

fn trigrams(s: &str) -> HashSet<[char; 3]> {
    // Padded like pg_trgm: two leading blanks, one trailing.
    let padded: Vec<char> = "  ".chars().chain(s.chars()).chain(" ".chars()).collect();
    padded.windows(3).map(|w| [w[0], w[1], w[2]]).collect()
}

/// Jaccard similarity of the padded trigram sets of two normalized names,
/// in `[0, 1]`. Empty input never matches.
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let left = trigrams(a);
    let right = trigrams(b);
    let shared = left.intersection(&right).count();
    let total = left.union(&right).count();
    if total == 0 {
        0.0
    } else {
        shared as f64 / total as f64
    }
}
