//! Term-frequency vectors and cosine similarity.

use std::collections::HashMap;

use super::corpus::Element;

/// Sparse term-frequency vector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TermVector {
    weights: HashMap<String, f64>,
}

impl TermVector {
    pub fn from_tokens<'a, I>(tokens: I) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut weights = HashMap::new();
        for token in tokens {
            *weights.entry(token.clone()).or_insert(0.0) += 1.0;
        }
        Self { weights }
    }

    fn norm(&self) -> f64 {
        self.weights.values().map(|w| w * w).sum::<f64>().sqrt()
    }

    /// Cosine similarity, 0.0 when either vector is empty.
    pub fn cosine(&self, other: &TermVector) -> f64 {
        let denom = self.norm() * other.norm();
        if denom == 0.0 {
            return 0.0;
        }
        let dot: f64 = self
            .weights
            .iter()
            .filter_map(|(token, w)| other.weights.get(token).map(|o| w * o))
            .sum();
        (dot / denom).clamp(0.0, 1.0)
    }
}

/// Cosine of the term against the element's document, times `discount`
/// when the element is outside the caller's context.
pub fn score(term: &TermVector, element: &Element, in_context: bool, discount: f64) -> Option<f64> {
    let cos = term.cosine(&TermVector::from_tokens(&element.document));
    if cos <= 0.0 {
        return None;
    }
    Some(if in_context { cos } else { cos * discount })
}
