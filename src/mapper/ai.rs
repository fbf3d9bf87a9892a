//! Optional AI-assisted matching.
//!
//! The engine never depends on an answer: every call is bounded by a hard
//! timeout and any failure degrades to [`AiAnswer::NoSuggestion`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A candidate element offered to the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiCandidate {
    pub path: String,
    pub kind: String,
    #[serde(default)]
    pub data_type: Option<String>,
}

/// One suggestion returned by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiSuggestion {
    pub path: String,
    /// Self-reported confidence; clamped to [0, 1] before use.
    pub confidence_hint: f64,
    #[serde(default)]
    pub rationale: String,
}

/// Failure reported by an assistant implementation.
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("rate limited")]
    RateLimited,

    #[error("assistant unavailable: {0}")]
    Unavailable(String),

    #[error("malformed answer: {0}")]
    Malformed(String),
}

/// External collaborator that ranks candidate elements for a term.
#[async_trait]
pub trait AiSuggestionProvider: Send + Sync {
    async fn suggest(&self, term: &str, candidates: &[AiCandidate]) -> Result<Vec<AiSuggestion>, AiError>;
}

/// Outcome of one assisted lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum AiAnswer {
    Suggestions(Vec<AiSuggestion>),
    NoSuggestion,
}

/// Ask `provider` about `term`, never waiting longer than `timeout`.
pub async fn ask(
    provider: &dyn AiSuggestionProvider,
    term: &str,
    candidates: &[AiCandidate],
    timeout: Duration,
) -> AiAnswer {
    match tokio::time::timeout(timeout, provider.suggest(term, candidates)).await {
        Ok(Ok(suggestions)) if !suggestions.is_empty() => AiAnswer::Suggestions(suggestions),
        Ok(Ok(_)) => AiAnswer::NoSuggestion,
        Ok(Err(e)) => {
            tracing::warn!(term, error = %e, "ai suggestion failed, falling through");
            AiAnswer::NoSuggestion
        }
        Err(_) => {
            tracing::warn!(term, timeout_ms = timeout.as_millis() as u64, "ai suggestion timed out");
            AiAnswer::NoSuggestion
        }
    }
}
