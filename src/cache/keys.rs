//! Cache key and invalidation tag conventions.
//!
//! ```text
//! databases                    -> [Database]
//! tables:{db}                  -> [Table] (listing, no columns)
//! table:{db}.{table}           -> Table (described)
//! mapping:{term}[@{context}]   -> [SemanticMapping]
//! query:{sha256 of intent}     -> GeneratedQuery
//! ```
//!
//! Tags: `schema:{table}`, `metric:{term}`, `database:{db}`, `listing:{db}`.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Helper for generating cache keys.
pub struct CacheKey;

impl CacheKey {
    pub fn databases() -> String {
        "databases".to_string()
    }

    pub fn tables(database: &str) -> String {
        format!("tables:{}", database)
    }

    pub fn table(database: &str, table: &str) -> String {
        format!("table:{}.{}", database, table)
    }

    /// Key for resolved mappings of `term`, optionally scoped to a context.
    pub fn mapping(term: &str, context: Option<&str>) -> String {
        match context {
            Some(ctx) if !ctx.is_empty() => format!("mapping:{}@{}", term, ctx),
            _ => format!("mapping:{}", term),
        }
    }

    /// Key for a generated query, from a SHA-256 of its JSON-serialized input.
    pub fn query<T: Serialize>(input: &T) -> Result<String, serde_json::Error> {
        Ok(format!("query:{}", compute_hash(input)?))
    }

    /// Parse a metadata key back into what it names, for warming.
    pub fn parse(key: &str) -> Option<KeyKind> {
        if key == "databases" {
            return Some(KeyKind::Databases);
        }
        if let Some(db) = key.strip_prefix("tables:") {
            return Some(KeyKind::Tables {
                database: db.to_string(),
            });
        }
        let rest = key.strip_prefix("table:")?;
        let (database, table) = rest.split_once('.')?;
        Some(KeyKind::Table {
            database: database.to_string(),
            table: table.to_string(),
        })
    }
}

/// A parsed metadata key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyKind {
    Databases,
    Tables { database: String },
    Table { database: String, table: String },
}

/// Helper for generating invalidation tags.
pub struct Tag;

impl Tag {
    pub fn schema(table: &str) -> String {
        format!("schema:{}", table)
    }

    pub fn metric(term: &str) -> String {
        format!("metric:{}", term)
    }

    pub fn database(database: &str) -> String {
        format!("database:{}", database)
    }

    pub fn listing(database: &str) -> String {
        format!("listing:{}", database)
    }
}

/// SHA-256 of a value's JSON form, as 64 lowercase hex characters.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_metadata_keys() {
        assert_eq!(CacheKey::parse("databases"), Some(KeyKind::Databases));
        assert_eq!(
            CacheKey::parse(&CacheKey::table("shop", "sales")),
            Some(KeyKind::Table {
                database: "shop".into(),
                table: "sales".into()
            })
        );
        assert_eq!(CacheKey::parse("mapping:revenue"), None);
    }

    #[test]
    fn test_query_key_is_stable() {
        let intent = json!({"metric": "revenue", "aggregation": "sum"});
        let a = CacheKey::query(&intent).unwrap();
        let b = CacheKey::query(&intent).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), "query:".len() + 64);
        assert_ne!(a, CacheKey::query(&json!({"metric": "orders"})).unwrap());
    }

    #[test]
    fn test_mapping_key_context() {
        assert_eq!(CacheKey::mapping("revenue", None), "mapping:revenue");
        assert_eq!(CacheKey::mapping("revenue", Some("sales")), "mapping:revenue@sales");
    }
}
