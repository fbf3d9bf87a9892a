//! NDJSON wire types exchanged with the database worker process.
//!
//! One JSON object per line in each direction. Requests carry an `id` that
//! the worker echoes back, so several requests can be in flight at once.

use serde::{Deserialize, Serialize};

use crate::schema::{ColumnSchema, DatabaseInfo, ForeignKey, IndexSchema, TableInfo, TableSchema};

// ============================================================================
// Envelopes
// ============================================================================

/// Request envelope sent to the worker.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    pub id: String,
    pub method: String,
    pub params: serde_json::Value,
}

/// Response envelope received from the worker.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseEnvelope {
    pub id: String,
    pub success: bool,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
}

/// Error information in a failed response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

// ============================================================================
// Parameters
// ============================================================================

/// Driver and connection string, flattened into every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub driver: String,
    pub connection_string: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionOnly {
    #[serde(flatten)]
    pub connection: ConnectionParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListTablesParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    pub schema: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    pub schema: String,
    pub table: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteQueryParams {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    pub sql: String,
    pub timeout_ms: u64,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct WireSchema {
    pub name: String,
    #[serde(default)]
    pub charset: Option<String>,
    #[serde(default)]
    pub collation: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListSchemasResponse {
    pub schemas: Vec<WireSchema>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireTable {
    pub schema: String,
    pub name: String,
    #[serde(default)]
    pub row_estimate: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListTablesResponse {
    pub tables: Vec<WireTable>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireColumn {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WirePrimaryKey {
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireIndex {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub is_unique: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireTableDetail {
    pub schema: String,
    pub name: String,
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub row_estimate: Option<u64>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub comment: Option<String>,
    pub columns: Vec<WireColumn>,
    #[serde(default)]
    pub primary_key: Option<WirePrimaryKey>,
    #[serde(default)]
    pub foreign_keys: Vec<WireForeignKey>,
    #[serde(default)]
    pub indexes: Vec<WireIndex>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetTableResponse {
    pub table: WireTableDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteQueryResponse {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    pub elapsed_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingResponse {
    pub ok: bool,
}

// ============================================================================
// Conversions into schema types
// ============================================================================

impl From<WireSchema> for DatabaseInfo {
    fn from(s: WireSchema) -> Self {
        DatabaseInfo {
            name: s.name,
            charset: s.charset,
            collation: s.collation,
        }
    }
}

impl From<WireTable> for TableInfo {
    fn from(t: WireTable) -> Self {
        TableInfo {
            database: t.schema,
            name: t.name,
            row_estimate: t.row_estimate,
        }
    }
}

impl From<WireTableDetail> for TableSchema {
    fn from(t: WireTableDetail) -> Self {
        let pk_columns = t.primary_key.map(|pk| pk.columns).unwrap_or_default();
        let columns = t
            .columns
            .into_iter()
            .map(|c| ColumnSchema {
                primary_key: pk_columns.iter().any(|p| p.eq_ignore_ascii_case(&c.name)),
                name: c.name,
                data_type: c.data_type,
                nullable: c.is_nullable,
                default: c.default_value,
                foreign_key: false,
                comment: c.comment,
            })
            .collect();

        TableSchema {
            database: t.schema,
            name: t.name,
            engine: t.engine,
            row_estimate: t.row_estimate,
            size_bytes: t.size_bytes,
            comment: t.comment,
            columns,
            foreign_keys: t
                .foreign_keys
                .into_iter()
                .map(|fk| ForeignKey {
                    name: fk.name,
                    columns: fk.columns,
                    referenced_table: fk.referenced_table,
                    referenced_columns: fk.referenced_columns,
                })
                .collect(),
            indexes: t
                .indexes
                .into_iter()
                .map(|i| IndexSchema {
                    name: i.name,
                    columns: i.columns,
                    unique: i.is_unique,
                })
                .collect(),
        }
        .normalized()
    }
}

/// Worker method names.
pub mod methods {
    pub const LIST_SCHEMAS: &str = "metadata.list_schemas";
    pub const LIST_TABLES: &str = "metadata.list_tables";
    pub const GET_TABLE: &str = "metadata.get_table";
    pub const EXECUTE_QUERY: &str = "query.execute";
    pub const PING: &str = "health.ping";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope_serialization() {
        let request = RequestEnvelope {
            id: "req-1".to_string(),
            method: methods::LIST_TABLES.to_string(),
            params: serde_json::to_value(ListTablesParams {
                connection: ConnectionParams {
                    driver: "mysql".to_string(),
                    connection_string: "mysql://localhost/shop".to_string(),
                },
                schema: "shop".to_string(),
            })
            .unwrap(),
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("metadata.list_tables"));
        assert!(json.contains("\"driver\":\"mysql\""));
        assert!(json.contains("\"schema\":\"shop\""));
    }

    #[test]
    fn test_table_detail_conversion() {
        let json = r#"{"table": {
            "schema": "shop", "name": "orders", "engine": "InnoDB", "row_estimate": 1200,
            "columns": [
                {"name": "id", "data_type": "int", "is_nullable": false},
                {"name": "customer_id", "data_type": "int", "is_nullable": false}
            ],
            "primary_key": {"columns": ["id"]},
            "foreign_keys": [{"name": "fk_cust", "columns": ["customer_id"],
                              "referenced_table": "customers", "referenced_columns": ["id"]}],
            "indexes": [{"name": "idx_cust", "columns": ["customer_id"]}]
        }}"#;

        let response: GetTableResponse = serde_json::from_str(json).unwrap();
        let table: TableSchema = response.table.into();

        assert_eq!(table.qualified_name(), "shop.orders");
        assert!(table.find_column("id").unwrap().primary_key);
        assert!(table.find_column("customer_id").unwrap().foreign_key);
        assert!(table.is_indexed("customer_id"));
        assert_eq!(table.row_estimate, Some(1200));
    }

    #[test]
    fn test_error_response_deserialization() {
        let json = r#"{"id": "x", "success": false,
                       "error": {"code": "QUERY_FAILED", "message": "Unknown column 'rev'"}}"#;
        let response: ResponseEnvelope = serde_json::from_str(json).unwrap();
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, "QUERY_FAILED");
    }
}
