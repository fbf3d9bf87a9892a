//! Business term to schema element resolution.
//!
//! # Pipeline
//!
//! ```text
//! term ─► normalize ─► Exact (1.0)
//!                      │ best < threshold
//!                      ▼
//!                      Fuzzy (edit distance / partial tokens, ×0.95)
//!                      │ best < threshold
//!                      ▼
//!                      Vector (TF cosine, discounted outside context)
//!                      │ best < threshold, AI configured
//!                      ▼
//!                      AI-assisted (hard timeout, failures fall through)
//!                      │
//!                      ▼
//!                      Learned (nudge, or replace after min feedback)
//! ```
//!
//! Ranked results are cached under `mapping:{term}` and tagged with
//! `metric:{term}` plus `schema:{table}` for every table they point into.

mod ai;
mod corpus;
mod fuzzy;
mod learning;
mod normalize;
mod types;
mod vector;

pub use ai::{AiAnswer, AiCandidate, AiError, AiSuggestion, AiSuggestionProvider};
pub use learning::{LearningState, PathEvidence};
pub use normalize::{normalize_term, singularize, tokens};
pub use types::{ElementFilter, MappingContext, MatchMethod, SemanticMapping};

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::cache::{compute_hash, CacheKey, CacheValue, EntryType, Tag};
use crate::config::{MapperSettings, SettingsHandle};
use crate::error::{EngineError, EngineResult};
use crate::schema::{ElementPath, ObjectKind, SchemaCatalog};
use crate::store::{FeedbackRecord, SchemaStore};
use corpus::{Corpus, Element};
use vector::TermVector;

/// Resolves business terms against the live schema.
pub struct SemanticMapper {
    catalog: SchemaCatalog,
    learning: LearningState,
    store: Option<Arc<SchemaStore>>,
    ai: Option<Arc<dyn AiSuggestionProvider>>,
    settings: SettingsHandle,
}

/// Merged strategy results keyed by path; the higher confidence wins.
#[derive(Default)]
struct Candidates {
    by_path: HashMap<ElementPath, SemanticMapping>,
}

impl Candidates {
    fn offer(&mut self, mapping: SemanticMapping) {
        match self.by_path.get(&mapping.path) {
            Some(existing) if existing.confidence >= mapping.confidence => {}
            _ => {
                self.by_path.insert(mapping.path.clone(), mapping);
            }
        }
    }

    fn best(&self) -> f64 {
        self.by_path
            .values()
            .map(|m| m.confidence)
            .fold(0.0, f64::max)
    }
}

impl SemanticMapper {
    pub fn new(catalog: SchemaCatalog, settings: SettingsHandle) -> Self {
        Self {
            catalog,
            learning: LearningState::new(),
            store: None,
            ai: None,
            settings,
        }
    }

    /// Persist feedback to `store`, replaying what it already holds.
    pub fn with_store(mut self, store: Arc<SchemaStore>) -> EngineResult<Self> {
        let step = self.settings.current().mapper.feedback_step;
        let history = store.all_feedback()?;
        self.learning = LearningState::replay(&history, step);
        tracing::debug!(events = history.len(), terms = self.learning.term_count(), "feedback replayed");
        self.store = Some(store);
        Ok(self)
    }

    /// Enable the AI-assisted strategy (still gated by `mapper.ai.enabled`).
    pub fn with_ai(mut self, ai: Arc<dyn AiSuggestionProvider>) -> Self {
        self.ai = Some(ai);
        self
    }

    pub fn learning(&self) -> &LearningState {
        &self.learning
    }

    /// Ranked mappings for `term` at or above the confidence floor.
    ///
    /// Fails with `AmbiguousMapping` (carrying the best candidates) when
    /// nothing reaches the floor.
    pub async fn resolve(
        &self,
        term: &str,
        context: Option<&MappingContext>,
        filter: Option<&ElementFilter>,
    ) -> EngineResult<Vec<SemanticMapping>> {
        let settings = self.settings.current();
        let term_tokens = tokens(term);
        if term_tokens.is_empty() {
            return Err(EngineError::InvalidIntent(format!("empty business term '{}'", term)));
        }
        let normalized = term_tokens.join("_");
        let key = mapping_key(&normalized, context, filter)?;

        let cached = self
            .catalog
            .cache()
            .get(&key)
            .and_then(|value| value.as_mappings().map(<[SemanticMapping]>::to_vec));
        let ranked = match cached {
            Some(ranked) => ranked,
            None => {
                // Feedback or a schema change landing mid-resolve drops the write.
                let epoch = self.catalog.cache().epoch();
                let ranked = self
                    .rank(&normalized, &term_tokens, context, filter, &settings.mapper)
                    .await?;
                self.catalog.cache().set_if_fresh(
                    key,
                    CacheValue::Mappings(ranked.clone()),
                    EntryType::SemanticMapping,
                    None,
                    mapping_tags(&normalized, &ranked),
                    epoch,
                );
                ranked
            }
        };

        let floor = settings.mapper.min_confidence;
        if ranked.first().is_some_and(|m| m.confidence >= floor) {
            Ok(ranked.into_iter().filter(|m| m.confidence >= floor).collect())
        } else {
            Err(EngineError::AmbiguousMapping {
                term: term.to_string(),
                floor,
                candidates: ranked,
            })
        }
    }

    /// Record that `chosen_path` was the right (or wrong) element for `term`.
    ///
    /// `quality` in [0, 1]: above 0.5 reinforces, below demotes.
    pub fn learn(&self, term: &str, chosen_path: &str, quality: f64) -> EngineResult<()> {
        if !(0.0..=1.0).contains(&quality) {
            return Err(EngineError::InvalidIntent(format!(
                "feedback quality must be within [0, 1], got {}",
                quality
            )));
        }
        let path = ElementPath::parse(chosen_path)
            .ok_or_else(|| EngineError::UnknownElement(chosen_path.to_string()))?;
        let normalized = normalize_term(term);
        if normalized.is_empty() {
            return Err(EngineError::InvalidIntent(format!("empty business term '{}'", term)));
        }

        let record = FeedbackRecord {
            term: normalized,
            path: path.to_string(),
            quality,
            recorded_at: Utc::now(),
        };
        if let Some(store) = &self.store {
            store.append_feedback(&record)?;
        }

        let step = self.settings.current().mapper.feedback_step;
        self.learning.record(&record, step);
        let removed = self.catalog.cache().invalidate(&Tag::metric(&record.term));
        tracing::debug!(term = %record.term, path = %record.path, quality, removed, "feedback recorded");
        Ok(())
    }

    async fn rank(
        &self,
        term: &str,
        term_tokens: &[String],
        context: Option<&MappingContext>,
        filter: Option<&ElementFilter>,
        settings: &MapperSettings,
    ) -> EngineResult<Vec<SemanticMapping>> {
        let tables = self.catalog.all_tables().await?;
        let corpus = Corpus::build(&tables, filter);
        let in_context = |path: &ElementPath| context.map_or(true, |c| c.is_empty() || c.covers(path));
        let threshold = settings.confidence_threshold;
        let mut found = Candidates::default();

        for element in corpus.elements().iter().filter(|e| e.is_exact(term)) {
            found.offer(mapping(term, element, 1.0, MatchMethod::Exact, in_context(&element.path)));
        }

        if found.best() < threshold {
            for element in corpus.elements() {
                if let Some(confidence) = fuzzy::score(term, term_tokens, element, settings.fuzzy_floor) {
                    found.offer(mapping(term, element, confidence, MatchMethod::Fuzzy, in_context(&element.path)));
                }
            }
        }

        if found.best() < threshold {
            let query = TermVector::from_tokens(term_tokens);
            for element in corpus.elements() {
                let covered = in_context(&element.path);
                if let Some(confidence) = vector::score(&query, element, covered, settings.context_discount) {
                    found.offer(mapping(term, element, confidence, MatchMethod::VectorSimilarity, covered));
                }
            }
        }

        if found.best() < threshold && settings.ai.enabled {
            if let Some(ai) = &self.ai {
                let candidates = ai_candidates(&corpus, &found, settings.ai.max_candidates);
                let timeout = Duration::from_millis(settings.ai.timeout_ms);
                if let AiAnswer::Suggestions(suggestions) = ai::ask(ai.as_ref(), term, &candidates, timeout).await {
                    for suggestion in suggestions {
                        let element = ElementPath::parse(&suggestion.path).and_then(|p| corpus.find(&p));
                        match element {
                            Some(element) => found.offer(mapping(
                                term,
                                element,
                                suggestion.confidence_hint.clamp(0.0, 1.0),
                                MatchMethod::AiAssisted,
                                in_context(&element.path),
                            )),
                            None => tracing::debug!(term, path = %suggestion.path, "ignoring ai suggestion for unknown element"),
                        }
                    }
                }
            }
        }

        let now = Utc::now();
        let evidence = self.learning.evidence(term);
        let mut ranked: Vec<SemanticMapping> = found.by_path.into_values().collect();
        for m in &mut ranked {
            if let Some(ev) = evidence.get(&m.path.to_string()) {
                learning::adjust(m, ev, settings, now);
            }
        }
        for (path, ev) in &evidence {
            if !learning::dominates(ev, settings) {
                continue;
            }
            let Some(element) = ElementPath::parse(path).and_then(|p| corpus.find(&p)) else {
                continue;
            };
            if ranked.iter().any(|m| m.path == element.path) {
                continue;
            }
            let mut learned = mapping(term, element, 0.0, MatchMethod::Learned, in_context(&element.path));
            learning::adjust(&mut learned, ev, settings, now);
            ranked.push(learned);
        }

        ranked.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| b.usage_count.cmp(&a.usage_count))
                .then_with(|| b.context_match.cmp(&a.context_match))
                .then_with(|| a.path.cmp(&b.path))
        });
        ranked.truncate(settings.max_candidates);

        tracing::debug!(
            term,
            candidates = ranked.len(),
            top = ranked.first().map(|m| m.path.to_string()).unwrap_or_default(),
            "term resolved"
        );
        Ok(ranked)
    }
}

fn mapping(term: &str, element: &Element, confidence: f64, method: MatchMethod, context_match: bool) -> SemanticMapping {
    SemanticMapping {
        term: term.to_string(),
        path: element.path.clone(),
        kind: element.kind,
        data_type: element.data_type.clone(),
        confidence,
        method,
        context_match,
        usage_count: 0,
        last_used: None,
    }
}

/// Already-scored elements first, then the rest of the corpus.
fn ai_candidates(corpus: &Corpus, found: &Candidates, limit: usize) -> Vec<AiCandidate> {
    let mut scored: Vec<&SemanticMapping> = found.by_path.values().collect();
    scored.sort_by(|a, b| b.confidence.total_cmp(&a.confidence).then_with(|| a.path.cmp(&b.path)));

    let first = scored.iter().filter_map(|m| corpus.find(&m.path));
    let rest = corpus
        .elements()
        .iter()
        .filter(|e| !found.by_path.contains_key(&e.path));
    first
        .chain(rest)
        .take(limit)
        .map(|e| AiCandidate {
            path: e.path.to_string(),
            kind: e.kind.to_string(),
            data_type: e.data_type.clone(),
        })
        .collect()
}

fn mapping_key(
    term: &str,
    context: Option<&MappingContext>,
    filter: Option<&ElementFilter>,
) -> EngineResult<String> {
    let context = context.filter(|c| !c.is_empty());
    let filter = filter.filter(|f| !f.is_empty());
    if context.is_none() && filter.is_none() {
        return Ok(CacheKey::mapping(term, None));
    }
    let scope = compute_hash(&(context, filter))
        .map_err(|e| EngineError::InvalidIntent(format!("unhashable mapping scope: {}", e)))?;
    Ok(CacheKey::mapping(term, Some(&scope[..16])))
}

fn mapping_tags(term: &str, ranked: &[SemanticMapping]) -> Vec<String> {
    let tables: BTreeSet<&str> = ranked
        .iter()
        .filter(|m| m.kind != ObjectKind::Database)
        .filter_map(|m| m.table())
        .collect();
    std::iter::once(Tag::metric(term))
        .chain(tables.into_iter().map(Tag::schema))
        .collect()
}
