//! Feedback-driven confidence adjustment.
//!
//! Raw feedback is append-only (persisted by the store). The live state here
//! is derived from it: per term and path, the outcomes seen so far, a bounded
//! running adjustment and usage counters. Below the minimum feedback count
//! the adjustment nudges strategy confidence; from then on the
//! recency-weighted success rate replaces it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::types::{MatchMethod, SemanticMapping};
use crate::config::MapperSettings;
use crate::store::FeedbackRecord;

/// Everything learned about one (term, path) pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathEvidence {
    outcomes: Vec<(f64, DateTime<Utc>)>,
    /// Sum of per-event nudges, each within `±feedback_step`.
    pub adjustment: f64,
    pub usage_count: u64,
    pub last_used: Option<DateTime<Utc>>,
}

impl PathEvidence {
    pub fn feedback_count(&self) -> usize {
        self.outcomes.len()
    }

    /// Mean outcome quality, each event weighted by `0.5^(age / half_life)`.
    pub fn success_rate(&self, now: DateTime<Utc>, half_life_days: f64) -> Option<f64> {
        let mut weighted = 0.0;
        let mut total = 0.0;
        for (quality, at) in &self.outcomes {
            let age_days = (now - *at).num_seconds().max(0) as f64 / 86_400.0;
            let weight = 0.5_f64.powf(age_days / half_life_days);
            weighted += quality * weight;
            total += weight;
        }
        (total > 0.0).then(|| (weighted / total).clamp(0.0, 1.0))
    }

    fn record(&mut self, quality: f64, at: DateTime<Utc>, step: f64) {
        self.outcomes.push((quality, at));
        self.adjustment += step * (2.0 * quality - 1.0);
        self.usage_count += 1;
        self.last_used = Some(self.last_used.map_or(at, |prev| prev.max(at)));
    }
}

/// Live learned state, shared by every `resolve` and `learn` call.
///
/// Each term's evidence sits in one map shard; readers clone it whole, so
/// they see a term either before or after a concurrent update.
#[derive(Debug, Default)]
pub struct LearningState {
    evidence: DashMap<String, HashMap<String, PathEvidence>>,
}

impl LearningState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild state from persisted feedback, oldest first.
    pub fn replay(records: &[FeedbackRecord], step: f64) -> Self {
        let state = Self::new();
        for record in records {
            state.record(record, step);
        }
        state
    }

    /// Fold one feedback event into the live state.
    pub fn record(&self, record: &FeedbackRecord, step: f64) {
        self.evidence
            .entry(record.term.clone())
            .or_default()
            .entry(record.path.clone())
            .or_default()
            .record(record.quality, record.recorded_at, step);
    }

    /// Snapshot of everything learned about `term`, keyed by path.
    pub fn evidence(&self, term: &str) -> HashMap<String, PathEvidence> {
        self.evidence
            .get(term)
            .map(|paths| paths.value().clone())
            .unwrap_or_default()
    }

    pub fn term_count(&self) -> usize {
        self.evidence.len()
    }
}

/// Apply learned evidence to one strategy result.
pub fn adjust(
    mapping: &mut SemanticMapping,
    evidence: &PathEvidence,
    settings: &MapperSettings,
    now: DateTime<Utc>,
) {
    mapping.usage_count = evidence.usage_count;
    mapping.last_used = evidence.last_used;

    if evidence.feedback_count() >= settings.min_feedback_count as usize {
        if let Some(rate) = evidence.success_rate(now, settings.feedback_half_life_days) {
            mapping.confidence = rate;
            mapping.method = MatchMethod::Learned;
            return;
        }
    }
    mapping.confidence = (mapping.confidence + evidence.adjustment).clamp(0.0, 1.0);
}

/// True when `evidence` is strong enough to stand on its own.
pub fn dominates(evidence: &PathEvidence, settings: &MapperSettings) -> bool {
    evidence.feedback_count() >= settings.min_feedback_count as usize
}
