//! Schema object types discovered from the remote provider.
//!
//! All values here are immutable snapshots. Re-discovery produces new values
//! that supersede the old ones; nothing is patched in place.

use serde::{Deserialize, Serialize};

/// A database (or schema, depending on the driver) visible to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    #[serde(default)]
    pub charset: Option<String>,
    #[serde(default)]
    pub collation: Option<String>,
}

impl DatabaseInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            charset: None,
            collation: None,
        }
    }
}

/// A table listed by `discover_tables`, before it is described.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub database: String,
    pub name: String,
    #[serde(default)]
    pub row_estimate: Option<u64>,
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    /// Database-specific type name (e.g. `decimal(12,2)`, `varchar(64)`).
    pub data_type: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub foreign_key: bool,
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default: None,
            primary_key: false,
            foreign_key: false,
            comment: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn family(&self) -> TypeFamily {
        TypeFamily::of(&self.data_type)
    }
}

/// A declared foreign key from the owning table to `referenced_table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    #[serde(default)]
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

/// Index metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSchema {
    /// True when `column` is the leading column of this index.
    pub fn leads_with(&self, column: &str) -> bool {
        self.columns
            .first()
            .is_some_and(|c| c.eq_ignore_ascii_case(column))
    }
}

/// Full description of a table as returned by `describe_table`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub database: String,
    pub name: String,
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub row_estimate: Option<u64>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub comment: Option<String>,
    pub columns: Vec<ColumnSchema>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    #[serde(default)]
    pub indexes: Vec<IndexSchema>,
}

impl TableSchema {
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
            engine: None,
            row_estimate: None,
            size_bytes: None,
            comment: None,
            columns: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnSchema) -> Self {
        self.columns.push(column);
        self
    }

    pub fn foreign_key(mut self, column: &str, referenced_table: &str, referenced_column: &str) -> Self {
        self.foreign_keys.push(ForeignKey {
            name: format!("fk_{}_{}", self.name, column),
            columns: vec![column.to_string()],
            referenced_table: referenced_table.to_string(),
            referenced_columns: vec![referenced_column.to_string()],
        });
        self.normalized()
    }

    pub fn index(mut self, name: &str, columns: &[&str], unique: bool) -> Self {
        self.indexes.push(IndexSchema {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique,
        });
        self
    }

    pub fn with_rows(mut self, rows: u64) -> Self {
        self.row_estimate = Some(rows);
        self
    }

    /// Sync column-level foreign key flags with the declared foreign keys.
    pub fn normalized(mut self) -> Self {
        for column in &mut self.columns {
            let in_fk = self
                .foreign_keys
                .iter()
                .any(|fk| fk.columns.iter().any(|c| c.eq_ignore_ascii_case(&column.name)));
            column.foreign_key = column.foreign_key || in_fk;
        }
        self
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// First column with a date/time type, used for time grains.
    pub fn temporal_column(&self) -> Option<&ColumnSchema> {
        self.columns
            .iter()
            .find(|c| matches!(c.family(), TypeFamily::Temporal))
    }

    /// True when some index leads with `column`.
    pub fn is_indexed(&self, column: &str) -> bool {
        self.indexes.iter().any(|idx| idx.leads_with(column))
            || self
                .columns
                .iter()
                .any(|c| c.primary_key && c.name.eq_ignore_ascii_case(column))
    }
}

/// Coarse classification of a column type, used for literal quoting and
/// compatibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeFamily {
    Numeric,
    Text,
    Temporal,
    Boolean,
    Other,
}

impl TypeFamily {
    pub fn of(data_type: &str) -> Self {
        let base = data_type
            .split(['(', ' '])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match base.as_str() {
            "int" | "integer" | "tinyint" | "smallint" | "mediumint" | "bigint" | "decimal"
            | "numeric" | "float" | "double" | "real" | "money" => TypeFamily::Numeric,
            "char" | "varchar" | "text" | "tinytext" | "mediumtext" | "longtext" | "nchar"
            | "nvarchar" | "string" | "enum" | "uuid" => TypeFamily::Text,
            "date" | "datetime" | "timestamp" | "time" | "year" | "timestamptz" => {
                TypeFamily::Temporal
            }
            "bool" | "boolean" | "bit" => TypeFamily::Boolean,
            _ => TypeFamily::Other,
        }
    }
}

/// Qualified location of a schema element: `database[.table[.column]]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementPath {
    pub database: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub column: Option<String>,
}

impl ElementPath {
    pub fn database(database: &str) -> Self {
        Self {
            database: database.to_string(),
            table: None,
            column: None,
        }
    }

    pub fn table(database: &str, table: &str) -> Self {
        Self {
            database: database.to_string(),
            table: Some(table.to_string()),
            column: None,
        }
    }

    pub fn column(database: &str, table: &str, column: &str) -> Self {
        Self {
            database: database.to_string(),
            table: Some(table.to_string()),
            column: Some(column.to_string()),
        }
    }

    /// Parse `db`, `db.table` or `db.table.column`.
    pub fn parse(path: &str) -> Option<Self> {
        let parts: Vec<&str> = path.split('.').collect();
        match parts.as_slice() {
            [db] if !db.is_empty() => Some(Self::database(db)),
            [db, table] => Some(Self::table(db, table)),
            [db, table, column] => Some(Self::column(db, table, column)),
            _ => None,
        }
    }
}

impl std::fmt::Display for ElementPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.database)?;
        if let Some(table) = &self.table {
            write!(f, ".{}", table)?;
        }
        if let Some(column) = &self.column {
            write!(f, ".{}", column)?;
        }
        Ok(())
    }
}

/// A column as a standalone schema object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnObject {
    pub database: String,
    pub table: String,
    pub column: ColumnSchema,
}

/// An index as a standalone schema object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexObject {
    pub database: String,
    pub table: String,
    pub index: IndexSchema,
}

/// One discovered schema element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaObject {
    Database(DatabaseInfo),
    Table(TableSchema),
    Column(ColumnObject),
    Index(IndexObject),
}

/// The kind of a [`SchemaObject`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Database,
    Table,
    Column,
    Index,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ObjectKind::Database => "database",
            ObjectKind::Table => "table",
            ObjectKind::Column => "column",
            ObjectKind::Index => "index",
        };
        f.write_str(s)
    }
}

impl SchemaObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            SchemaObject::Database(_) => ObjectKind::Database,
            SchemaObject::Table(_) => ObjectKind::Table,
            SchemaObject::Column(_) => ObjectKind::Column,
            SchemaObject::Index(_) => ObjectKind::Index,
        }
    }

    /// Qualified path of this object. Indexes live under
    /// `database.table.<index name>` and are distinguished by kind.
    pub fn path(&self) -> ElementPath {
        match self {
            SchemaObject::Database(db) => ElementPath::database(&db.name),
            SchemaObject::Table(t) => ElementPath::table(&t.database, &t.name),
            SchemaObject::Column(c) => ElementPath::column(&c.database, &c.table, &c.column.name),
            SchemaObject::Index(i) => ElementPath::column(&i.database, &i.table, &i.index.name),
        }
    }

    /// Unique key within a snapshot: kind plus path.
    pub fn snapshot_key(&self) -> String {
        format!("{}:{}", self.kind(), self.path())
    }

    /// Name of the table this object belongs to, if any.
    pub fn table_name(&self) -> Option<&str> {
        match self {
            SchemaObject::Database(_) => None,
            SchemaObject::Table(t) => Some(&t.name),
            SchemaObject::Column(c) => Some(&c.table),
            SchemaObject::Index(i) => Some(&i.table),
        }
    }

    pub fn database_name(&self) -> &str {
        match self {
            SchemaObject::Database(db) => &db.name,
            SchemaObject::Table(t) => &t.database,
            SchemaObject::Column(c) => &c.database,
            SchemaObject::Index(i) => &i.database,
        }
    }

    /// Flatten a described table into its table, column and index objects.
    ///
    /// The table object keeps its table-level attributes only so that a
    /// column change is reported once, on the column.
    pub fn flatten(table: &TableSchema) -> Vec<SchemaObject> {
        let mut objects = Vec::with_capacity(1 + table.columns.len() + table.indexes.len());
        let mut shell = table.clone();
        shell.columns.clear();
        shell.indexes.clear();
        shell.row_estimate = None;
        shell.size_bytes = None;
        objects.push(SchemaObject::Table(shell));
        for column in &table.columns {
            objects.push(SchemaObject::Column(ColumnObject {
                database: table.database.clone(),
                table: table.name.clone(),
                column: column.clone(),
            }));
        }
        for index in &table.indexes {
            objects.push(SchemaObject::Index(IndexObject {
                database: table.database.clone(),
                table: table.name.clone(),
                index: index.clone(),
            }));
        }
        objects
    }
}

/// Result of `execute_query`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    pub elapsed_ms: Option<u64>,
}
