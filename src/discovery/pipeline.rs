//! Tiered discovery for a single topic
//!
//! 1. Local persistence lookup (exact normalized username or title)
//! 2. Explicit handle resolution (`@name`, t.me link, bare username)
//! 3. Query plan execution with early stop once a candidate scores high
//! 4. Fuzzy ranking and selection
//!
//! Only a `found` result is persisted here. Ambiguous and not-found outcomes
//! carry their alternatives, the executed queries and every attempt so a
//! caller can tell "nothing exists" apart from "search degraded".

use super::normalize::{explicit_handle, normalize_title, username_form};
use super::query_plan::build_plan;
use super::ranking::{compare_ranked, merge_best, CandidateScorer, Confidence, RankedResult};
use super::suggest::SuggestionStrategy;
use crate::cache::TtlCache;
use crate::config::{CacheConfig, DiscoveryConfig};
use crate::control::{ControlSignal, Shutdown};
use crate::gateway::{BackoffController, Category, GatewayError};
use crate::store::{unix_now, Store, StoreError};
use crate::telegram::{classify, Candidate, EntityKind, ProtocolClient, RawEntity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("shutdown requested")]
    Shutdown,
}

impl From<Shutdown> for DiscoveryError {
    fn from(_: Shutdown) -> Self {
        DiscoveryError::Shutdown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStatus {
    Found,
    Ambiguous,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptResult {
    Success { results: usize },
    Cached { results: usize },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attempt {
    Resolve { target: String, outcome: AttemptResult },
    Search { query: String, outcome: AttemptResult },
}

impl Attempt {
    pub fn is_search(&self) -> bool {
        matches!(self, Attempt::Search { .. })
    }

    pub fn is_failed(&self) -> bool {
        match self {
            Attempt::Resolve { outcome, .. } | Attempt::Search { outcome, .. } => {
                matches!(outcome, AttemptResult::Failed { .. })
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryOutcome {
    pub topic: String,
    pub status: DiscoveryStatus,
    pub best: Option<RankedResult>,
    pub alternatives: Vec<RankedResult>,
    pub queries: Vec<String>,
    pub attempts: Vec<Attempt>,
    /// Every ranked candidate, best first
    pub candidates: Vec<RankedResult>,
    /// Entities this call inserted into the store
    pub created_entities: Vec<i64>,
}

impl DiscoveryOutcome {
    fn single(topic: &str, result: RankedResult, attempts: Vec<Attempt>, created_entities: Vec<i64>) -> Self {
        Self {
            topic: topic.to_string(),
            status: DiscoveryStatus::Found,
            best: Some(result.clone()),
            alternatives: Vec::new(),
            queries: Vec::new(),
            attempts,
            candidates: vec![result],
            created_entities,
        }
    }

    /// True when searches were attempted and every one of them failed
    pub fn all_searches_failed(&self) -> bool {
        let mut searches = self.attempts.iter().filter(|a| a.is_search()).peekable();
        searches.peek().is_some() && searches.all(|a| a.is_failed())
    }
}

pub struct DiscoveryPipeline {
    client: Arc<dyn ProtocolClient>,
    backoff: Arc<BackoffController>,
    store: Arc<dyn Store>,
    control: ControlSignal,
    strategy: SuggestionStrategy,
    scorer: CandidateScorer,
    config: DiscoveryConfig,
    cache_config: CacheConfig,
    search_cache: TtlCache<Vec<Candidate>>,
    negative_cache: TtlCache<()>,
    resolved_cache: TtlCache<Candidate>,
}

impl DiscoveryPipeline {
    pub fn new(
        client: Arc<dyn ProtocolClient>,
        backoff: Arc<BackoffController>,
        store: Arc<dyn Store>,
        control: ControlSignal,
        strategy: SuggestionStrategy,
        config: DiscoveryConfig,
        cache_config: CacheConfig,
    ) -> Self {
        Self {
            client,
            backoff,
            store,
            control,
            strategy,
            scorer: CandidateScorer::new(config.medium_threshold, config.high_threshold),
            search_cache: TtlCache::new(cache_config.search_ttl, cache_config.max_items),
            negative_cache: TtlCache::new(cache_config.negative_ttl, cache_config.max_items),
            resolved_cache: TtlCache::new(cache_config.resolve_ttl, cache_config.max_items),
            config,
            cache_config,
        }
    }

    pub fn strategy(&self) -> &SuggestionStrategy {
        &self.strategy
    }

    pub fn medium_threshold(&self) -> f64 {
        self.config.medium_threshold
    }

    fn kind_allowed(&self, kind: EntityKind) -> bool {
        match kind {
            EntityKind::Group => true,
            EntityKind::Channel => self.config.allow_channels,
            _ => false,
        }
    }

    fn accept(&self, raw: &RawEntity) -> Option<Candidate> {
        if raw.scam || raw.fake {
            return None;
        }
        let candidate = classify(raw);
        if self.kind_allowed(candidate.kind) {
            Some(candidate)
        } else {
            None
        }
    }

    /// Run the full pipeline for `raw_topic`
    pub async fn discover(&mut self, raw_topic: &str) -> Result<DiscoveryOutcome, DiscoveryError> {
        log::info!("🔎 Discovery started for '{}'", raw_topic);

        let title_norm = normalize_title(raw_topic);
        let handle = explicit_handle(raw_topic);
        let username = handle.clone().or_else(|| username_form(raw_topic));

        if let Some(cached) = self.lookup_store(username.as_deref(), &title_norm).await? {
            log::info!("   └─ 💾 Store hit: {}", cached.label());
            let result = RankedResult {
                candidate: cached,
                score: 1.0,
                confidence: Confidence::Cached,
                matched_query: raw_topic.to_string(),
            };
            return Ok(DiscoveryOutcome::single(raw_topic, result, Vec::new(), Vec::new()));
        }

        let mut attempts = Vec::new();

        if let Some(handle) = handle {
            if let Some(candidate) = self.resolve_handle(&handle, &mut attempts).await? {
                log::info!("   └─ 🎯 Resolved handle @{}: {}", handle, candidate.label());
                let created = self.persist_found(&candidate).await?;
                let created_entities = if created { vec![candidate.entity_id] } else { Vec::new() };
                let result = RankedResult {
                    candidate,
                    score: 1.0,
                    confidence: Confidence::High,
                    matched_query: handle,
                };
                return Ok(DiscoveryOutcome::single(raw_topic, result, attempts, created_entities));
            }
        }

        let suggestions = self.strategy.suggest(raw_topic, self.config.suggestion_count).await;
        let plan = build_plan(raw_topic, &suggestions, self.config.max_queries);
        log::debug!("   ├─ Query plan: {} queries", plan.queries.len());

        let mut executed: Vec<String> = Vec::new();
        let mut best_by_entity: HashMap<i64, RankedResult> = HashMap::new();

        for (index, query) in plan.queries.iter().enumerate() {
            if index > 0 {
                self.control.wait_until_resumed_or_shutdown().await?;
            }

            let (candidates, outcome) = match self.search_query(query).await {
                Ok(found) => found,
                Err(GatewayError::Shutdown) => return Err(DiscoveryError::Shutdown),
                Err(e) => {
                    let rate_limited = e.is_rate_limited();
                    attempts.push(Attempt::Search {
                        query: query.clone(),
                        outcome: AttemptResult::Failed { error: e.to_string() },
                    });
                    executed.push(query.clone());
                    if rate_limited {
                        log::warn!("   ├─ 🚫 Search rate limited, stopping plan for '{}'", raw_topic);
                        break;
                    }
                    continue;
                }
            };

            attempts.push(Attempt::Search {
                query: query.clone(),
                outcome,
            });
            executed.push(query.clone());

            // Re-rank everything seen so far against every executed query
            let mut pool: Vec<Candidate> = best_by_entity.values().map(|r| r.candidate.clone()).collect();
            pool.extend(candidates);
            let ranked = self.scorer.rank(&executed, &plan.keyword_tokens, &pool);
            merge_best(&mut best_by_entity, ranked);

            let top = best_by_entity.values().map(|r| r.score).fold(0.0_f64, f64::max);
            if top >= self.config.high_threshold {
                log::debug!("   ├─ Early stop after '{}' (top score {:.2})", query, top);
                break;
            }
        }

        let mut ranked: Vec<RankedResult> = best_by_entity.into_values().collect();
        ranked.sort_by(compare_ranked);

        let top_score = ranked.first().map(|r| r.score).unwrap_or(0.0);
        let status = if top_score >= self.config.high_threshold {
            DiscoveryStatus::Found
        } else if top_score >= self.config.medium_threshold {
            DiscoveryStatus::Ambiguous
        } else {
            DiscoveryStatus::NotFound
        };

        let (best, alternatives): (Option<RankedResult>, Vec<RankedResult>) = match status {
            DiscoveryStatus::Found | DiscoveryStatus::Ambiguous => (
                ranked.first().cloned(),
                ranked.iter().skip(1).take(self.config.max_alternatives).cloned().collect(),
            ),
            DiscoveryStatus::NotFound => (
                None,
                ranked.iter().take(self.config.max_alternatives).cloned().collect(),
            ),
        };

        let mut created_entities = Vec::new();
        if status == DiscoveryStatus::Found {
            if let Some(best) = &best {
                if self.persist_found(&best.candidate).await? {
                    created_entities.push(best.candidate.entity_id);
                }
            }
        }

        match &best {
            Some(best) => log::info!(
                "   └─ {:?}: {} (score {:.2}, {} queries)",
                status,
                best.candidate.label(),
                best.score,
                executed.len()
            ),
            None => log::info!(
                "   └─ NotFound after {} queries, {} alternatives",
                executed.len(),
                alternatives.len()
            ),
        }

        Ok(DiscoveryOutcome {
            topic: raw_topic.to_string(),
            status,
            best,
            alternatives,
            queries: executed,
            attempts,
            candidates: ranked,
            created_entities,
        })
    }

    async fn lookup_store(&self, username: Option<&str>, title_norm: &str) -> Result<Option<Candidate>, StoreError> {
        if let Some(username) = username {
            if let Some(record) = self.store.find_entity_by_username(username).await? {
                return Ok(Some(record.to_candidate()));
            }
        }
        Ok(self
            .store
            .find_entity_by_title(title_norm)
            .await?
            .map(|record| record.to_candidate()))
    }

    async fn resolve_handle(
        &mut self,
        handle: &str,
        attempts: &mut Vec<Attempt>,
    ) -> Result<Option<Candidate>, DiscoveryError> {
        if let Some(candidate) = self.resolved_cache.get(handle) {
            attempts.push(Attempt::Resolve {
                target: handle.to_string(),
                outcome: AttemptResult::Cached { results: 1 },
            });
            return Ok(Some(candidate));
        }

        let client = &self.client;
        let result = self
            .backoff
            .call(Category::Resolve, handle, move || client.resolve(handle))
            .await;

        match result {
            Ok(raw) => {
                attempts.push(Attempt::Resolve {
                    target: handle.to_string(),
                    outcome: AttemptResult::Success { results: 1 },
                });
                match self.accept(&raw) {
                    Some(candidate) => {
                        self.resolved_cache.set(handle, candidate.clone(), None);
                        Ok(Some(candidate))
                    }
                    None => {
                        log::debug!("   ├─ @{} resolved to a disallowed entity", handle);
                        Ok(None)
                    }
                }
            }
            Err(GatewayError::Shutdown) => Err(DiscoveryError::Shutdown),
            Err(e) => {
                log::debug!("   ├─ Resolve @{} failed: {}", handle, e);
                attempts.push(Attempt::Resolve {
                    target: handle.to_string(),
                    outcome: AttemptResult::Failed { error: e.to_string() },
                });
                Ok(None)
            }
        }
    }

    async fn search_query(&mut self, query: &str) -> Result<(Vec<Candidate>, AttemptResult), GatewayError> {
        let key = query.to_lowercase();

        if self.negative_cache.has(&key) {
            return Ok((Vec::new(), AttemptResult::Cached { results: 0 }));
        }
        if let Some(candidates) = self.search_cache.get(&key) {
            let results = candidates.len();
            return Ok((candidates, AttemptResult::Cached { results }));
        }

        let client = &self.client;
        let limit = self.config.search_limit;
        let raws = self
            .backoff
            .call(Category::Search, query, move || client.search(query, limit))
            .await?;

        let results = raws.len();
        let candidates: Vec<Candidate> = raws.iter().filter_map(|raw| self.accept(raw)).collect();

        if candidates.is_empty() {
            self.negative_cache.set(key, (), Some(self.cache_config.negative_ttl));
        } else {
            self.search_cache.set(key, candidates.clone(), None);
        }

        Ok((candidates, AttemptResult::Success { results }))
    }

    /// Returns `true` when the entity was not stored before
    async fn persist_found(&self, candidate: &Candidate) -> Result<bool, StoreError> {
        let now = unix_now();
        let created = self.store.upsert_entity(candidate, now).await?;
        self.store.ensure_membership(candidate.entity_id, now).await?;
        Ok(created)
    }
}
