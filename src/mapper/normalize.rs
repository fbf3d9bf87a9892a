//! Term and identifier normalization.
//!
//! Business terms and schema names meet in one form: lowercase snake case,
//! every token singular. `"Monthly Sales"`, `"monthlySales"` and
//! `"monthly_sale"` all normalize to `monthly_sale`.

use inflector::Inflector;

/// Irregular plurals common in schemas that inflector gets wrong.
static IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
    ("leaf", "leaves"),
    ("life", "lives"),
    ("half", "halves"),
    ("analysis", "analyses"),
    ("basis", "bases"),
    ("crisis", "crises"),
    ("criterion", "criteria"),
    ("datum", "data"),
    ("medium", "media"),
    ("index", "indices"),
    ("matrix", "matrices"),
    ("vertex", "vertices"),
];

/// Words whose trailing `s` is not a plural marker.
static NOT_PLURAL: &[&str] = &[
    "status", "address", "analysis", "bus", "gross", "loss", "class", "process", "access",
    "business", "news", "series", "species", "plus", "minus", "bonus", "canvas", "sms", "os",
];

/// Singular form of one lowercase word.
pub fn singularize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }

    let lower = word.to_lowercase();
    for (singular, plural) in IRREGULAR_PLURALS {
        if lower == *plural || lower == *singular {
            return singular.to_string();
        }
    }
    if NOT_PLURAL.contains(&lower.as_str()) || lower.len() <= 2 {
        return lower;
    }

    lower.to_singular()
}

/// Split a term or identifier into singular lowercase tokens.
///
/// Any non-alphanumeric character separates tokens, and so do camelCase
/// boundaries.
pub fn tokens(text: &str) -> Vec<String> {
    let spaced: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    spaced
        .split_whitespace()
        .flat_map(|word| {
            word.to_snake_case()
                .split('_')
                .filter(|t| !t.is_empty())
                .map(singularize)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Canonical form used for exact comparison and as the learning key.
pub fn normalize_term(text: &str) -> String {
    tokens(text).join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("customers"), "customer");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("people"), "person");
        assert_eq!(singularize("data"), "datum");
        assert_eq!(singularize("status"), "status");
        assert_eq!(singularize("address"), "address");
        assert_eq!(singularize("revenue"), "revenue");
        assert_eq!(singularize("id"), "id");
        assert_eq!(singularize(""), "");
    }

    #[test]
    fn test_tokens_split_on_case_and_punctuation() {
        assert_eq!(tokens("monthlyRevenue"), vec!["monthly", "revenue"]);
        assert_eq!(tokens("Total Sales"), vec!["total", "sale"]);
        assert_eq!(tokens("order-items"), vec!["order", "item"]);
        assert_eq!(tokens("sales.revenue"), vec!["sale", "revenue"]);
        assert!(tokens("  ").is_empty());
    }

    #[test]
    fn test_normalize_term_equates_spellings() {
        assert_eq!(normalize_term("customer ids"), normalize_term("customer_id"));
        assert_eq!(normalize_term("Revenue"), "revenue");
        assert_eq!(normalize_term("orders"), normalize_term("Order"));
    }
}
