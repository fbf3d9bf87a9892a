//! Schema objects and the cache-first catalog that loads them.

pub mod catalog;
mod types;

pub use catalog::SchemaCatalog;
pub use types::{
    ColumnObject, ColumnSchema, DatabaseInfo, ElementPath, ForeignKey, IndexObject, IndexSchema,
    ObjectKind, QueryResult, SchemaObject, TableInfo, TableSchema, TypeFamily,
};
