//! Edit-distance and partial-match scoring.

use std::collections::HashSet;

use super::corpus::Element;

/// Fuzzy confidence never reaches an exact match.
const FUZZY_SCALE: f64 = 0.95;

/// Levenshtein distance, two-row Wagner-Fischer.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let (short, long) = if a.len() < b.len() { (&a, &b) } else { (&b, &a) };
    let mut prev: Vec<usize> = (0..=short.len()).collect();
    let mut curr = vec![0; short.len() + 1];

    for (i, lc) in long.iter().enumerate() {
        curr[0] = i + 1;
        for (j, sc) in short.iter().enumerate() {
            let cost = usize::from(lc != sc);
            curr[j + 1] = (curr[j] + 1).min(prev[j + 1] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[short.len()]
}

/// `1 - distance / longer length`, in [0, 1].
pub fn edit_similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

fn jaccard(a: &[String], b: &[String]) -> f64 {
    let a: HashSet<&String> = a.iter().collect();
    let b: HashSet<&String> = b.iter().collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// One token list contained in the other, scaled by how much is covered.
fn partial(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.iter().all(|t| long.contains(t)) {
        0.75 + 0.2 * (short.len() as f64 / long.len() as f64)
    } else {
        0.0
    }
}

/// Similarity of a normalized term to an element name, in [0, 1].
pub fn similarity(term: &str, term_tokens: &[String], element: &Element) -> f64 {
    let mut best = edit_similarity(term, &element.normalized)
        .max(jaccard(term_tokens, &element.name_tokens))
        .max(partial(term_tokens, &element.name_tokens));
    if let Some(alias) = &element.alias {
        best = best.max(edit_similarity(term, alias));
    }
    best
}

/// Fuzzy confidence for `element`, or `None` below `floor`.
pub fn score(term: &str, term_tokens: &[String], element: &Element, floor: f64) -> Option<f64> {
    let sim = similarity(term, term_tokens, element);
    (sim >= floor).then_some(sim * FUZZY_SCALE)
}
