//! Caller-facing error taxonomy.
//!
//! Lower layers have their own error types (`ProviderError`,
//! `SettingsError`, `StoreError`). Everything that reaches a caller of
//! [`crate::EngineState`] is an [`EngineError`] carrying the term, table or
//! path involved.

use std::time::Duration;

use thiserror::Error;

use crate::config::SettingsError;
use crate::mapper::SemanticMapping;
use crate::provider::ProviderError;
use crate::store::StoreError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The provider stayed unreachable after retries.
    #[error("provider '{endpoint}' unavailable after {attempts} attempt(s): {source}")]
    Connectivity {
        endpoint: String,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    /// Malformed SQL or a schema mismatch reported by the provider.
    #[error("validation failed{}: {message}", code.as_deref().map(|c| format!(" ({})", c)).unwrap_or_default())]
    Validation {
        sql: Option<String>,
        code: Option<String>,
        message: String,
    },

    /// No mapping for `term` reaches the confidence floor.
    #[error("ambiguous mapping for '{term}': no candidate reaches {floor:.2} ({} candidate(s))", candidates.len())]
    AmbiguousMapping {
        term: String,
        floor: f64,
        candidates: Vec<SemanticMapping>,
    },

    /// The mapped tables are not connected by declared foreign keys.
    #[error("no join path from '{from}' to '{to}'")]
    NoJoinPath { from: String, to: String },

    /// The endpoint's breaker is open; no network attempt was made.
    #[error("circuit open for '{endpoint}', retry in {retry_after:?}")]
    CircuitOpen {
        endpoint: String,
        retry_after: Duration,
    },

    #[error("configuration error: {0}")]
    Configuration(#[from] SettingsError),

    /// The operation exceeded the caller-supplied or configured timeout.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    /// A referenced database, table or column does not exist.
    #[error("unknown schema element '{0}'")]
    UnknownElement(String),

    /// The intent itself is inconsistent (e.g. a range filter on a text column).
    #[error("invalid intent: {0}")]
    InvalidIntent(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("engine is shut down")]
    ShutDown,
}

/// Stable, machine-readable error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connectivity,
    Validation,
    AmbiguousMapping,
    NoJoinPath,
    CircuitOpen,
    Configuration,
    Timeout,
    UnknownElement,
    InvalidIntent,
    Store,
    ShutDown,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Connectivity { .. } => ErrorKind::Connectivity,
            EngineError::Validation { .. } => ErrorKind::Validation,
            EngineError::AmbiguousMapping { .. } => ErrorKind::AmbiguousMapping,
            EngineError::NoJoinPath { .. } => ErrorKind::NoJoinPath,
            EngineError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            EngineError::Configuration(_) => ErrorKind::Configuration,
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::UnknownElement(_) => ErrorKind::UnknownElement,
            EngineError::InvalidIntent(_) => ErrorKind::InvalidIntent,
            EngineError::Store(_) => ErrorKind::Store,
            EngineError::ShutDown => ErrorKind::ShutDown,
        }
    }

    pub fn validation(sql: Option<&str>, message: impl Into<String>) -> Self {
        EngineError::Validation {
            sql: sql.map(str::to_string),
            code: None,
            message: message.into(),
        }
    }

    pub fn timeout(operation: &str, timeout: Duration) -> Self {
        EngineError::Timeout {
            operation: operation.to_string(),
            timeout,
        }
    }

    /// Translate a non-transient provider failure. `sql` is attached for
    /// query calls so the caller sees which statement was rejected.
    pub fn from_provider(endpoint: &str, sql: Option<&str>, error: ProviderError) -> Self {
        match error {
            ProviderError::Rejected { code, message } => EngineError::Validation {
                sql: sql.map(str::to_string),
                code: Some(code),
                message,
            },
            ProviderError::NotFound(what) => EngineError::UnknownElement(what),
            ProviderError::Protocol(message) => EngineError::Validation {
                sql: sql.map(str::to_string),
                code: Some("PROTOCOL".to_string()),
                message,
            },
            transient => EngineError::Connectivity {
                endpoint: endpoint.to_string(),
                attempts: 1,
                source: transient,
            },
        }
    }

    /// True when retrying later (not rephrasing) might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Connectivity { .. } | EngineError::CircuitOpen { .. } | EngineError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_surfaces_verbatim() {
        let err = EngineError::from_provider(
            "worker:mysql",
            Some("SELECT nope FROM sales"),
            ProviderError::rejected("1054", "Unknown column 'nope' in 'field list'"),
        );
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(
            err.to_string(),
            "validation failed (1054): Unknown column 'nope' in 'field list'"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_found_names_element() {
        let err = EngineError::from_provider("e", None, ProviderError::NotFound("shop.nope".into()));
        assert_eq!(err.kind(), ErrorKind::UnknownElement);
        assert!(err.to_string().contains("shop.nope"));
    }

    #[test]
    fn test_transient_becomes_connectivity() {
        let err = EngineError::from_provider("e", None, ProviderError::Timeout(Duration::from_secs(1)));
        assert_eq!(err.kind(), ErrorKind::Connectivity);
        assert!(err.is_retryable());
    }
}
