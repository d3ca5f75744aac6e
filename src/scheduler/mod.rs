//! Adaptive query scheduler
//!
//! Chooses the next keyword for the crawler from the seeded base list plus
//! the evolved pool. A keyword is skipped while it is inside its cooldown
//! (used recently) or its failure backoff window (last run failed or found
//! nothing new). Survivors are picked by weight, evolved keywords weighing
//! more. When nothing survives, the scheduler walks the base list
//! round-robin so it never stalls.

pub mod evolution;
pub mod keywords;

pub use evolution::KeywordEvolution;
pub use keywords::{default_keywords, generate_base_keywords};

use crate::config::SchedulerConfig;
use crate::discovery::SuggestionStrategy;
use crate::store::{EntityRecord, Store, StoreError};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordSource {
    Base,
    Evolved,
}

pub struct QueryScheduler {
    store: Arc<dyn Store>,
    config: SchedulerConfig,
    base: Vec<String>,
    base_set: HashSet<String>,
    evolution: KeywordEvolution,
    rng: StdRng,
    cursor: usize,
}

impl QueryScheduler {
    pub fn new(store: Arc<dyn Store>, config: SchedulerConfig) -> Self {
        let seeds = if config.base_keywords.is_empty() {
            default_keywords()
        } else {
            config.base_keywords.clone()
        };
        let base = generate_base_keywords(&seeds, config.seed);
        let base_set = base.iter().cloned().collect();

        log::info!("🗂️  Scheduler ready with {} base keywords (seed {})", base.len(), config.seed);

        Self {
            store,
            evolution: KeywordEvolution::new(config.evolved_pool_max),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            base,
            base_set,
            cursor: 0,
        }
    }

    pub fn base_keywords(&self) -> &[String] {
        &self.base
    }

    pub fn evolution(&self) -> &KeywordEvolution {
        &self.evolution
    }

    /// Add a keyword to the evolved pool directly
    pub fn add_evolved(&mut self, keyword: &str) -> bool {
        let keyword = keywords::normalize_keyword(keyword);
        if self.base_set.contains(&keyword) {
            return false;
        }
        self.evolution.insert(keyword)
    }

    pub async fn evolve(
        &mut self,
        strategy: &SuggestionStrategy,
        entities: &[EntityRecord],
        sample: usize,
    ) -> Vec<String> {
        self.evolution
            .evolve_from_entities(strategy, entities, sample, &self.base_set)
            .await
    }

    /// True when `keyword` is outside both its cooldown and failure backoff
    pub async fn is_eligible(&self, keyword: &str, now: i64) -> Result<bool, StoreError> {
        let failure_window = self.config.failure_backoff.as_secs() as i64;
        if let Some(run) = self.store.last_search_run(keyword).await? {
            let finished = run.finished_at.unwrap_or(run.started_at);
            let unproductive = !run.success || run.new_results_count == 0;
            if unproductive && now - finished < failure_window {
                log::debug!("   ├─ Skipping '{}' (failure backoff)", keyword);
                return Ok(false);
            }
        }

        let cooldown = self.config.cooldown.as_secs() as i64;
        if let Some(usage) = self.store.keyword_usage(keyword).await? {
            if now - usage.last_used_at < cooldown {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Pick the next keyword and record its usage
    pub async fn next_query(&mut self, now: i64) -> Result<Option<String>, StoreError> {
        let mut pool: Vec<(String, KeywordSource)> = self
            .base
            .iter()
            .map(|k| (k.clone(), KeywordSource::Base))
            .collect();
        pool.extend(
            self.evolution
                .keywords()
                .into_iter()
                .filter(|k| !self.base_set.contains(k))
                .map(|k| (k, KeywordSource::Evolved)),
        );

        if pool.is_empty() {
            return Ok(None);
        }

        let sample: Vec<(String, KeywordSource)> = pool
            .choose_multiple(&mut self.rng, self.config.sample_size.max(1))
            .cloned()
            .collect();

        let mut survivors = Vec::new();
        for (keyword, source) in sample {
            if self.is_eligible(&keyword, now).await? {
                survivors.push((keyword, source));
            }
        }

        let chosen = match self.pick_weighted(&survivors) {
            Some(keyword) => keyword,
            None => match self.round_robin() {
                Some(keyword) => {
                    log::debug!("   ├─ No eligible keyword sampled, round-robin fallback");
                    keyword
                }
                None => return Ok(None),
            },
        };

        self.store.record_keyword_usage(&chosen, now).await?;
        Ok(Some(chosen))
    }

    /// Keywords the round-robin fallback would yield next
    pub fn preview(&self, limit: usize) -> Vec<String> {
        if self.base.is_empty() {
            return Vec::new();
        }
        (0..limit.min(self.base.len()))
            .map(|offset| self.base[(self.cursor + offset) % self.base.len()].clone())
            .collect()
    }

    fn pick_weighted(&mut self, survivors: &[(String, KeywordSource)]) -> Option<String> {
        if survivors.is_empty() {
            return None;
        }
        let weights: Vec<f64> = survivors
            .iter()
            .map(|(_, source)| match source {
                KeywordSource::Base => self.config.base_weight,
                KeywordSource::Evolved => self.config.evolved_weight,
            })
            .collect();

        match WeightedIndex::new(&weights) {
            Ok(index) => Some(survivors[index.sample(&mut self.rng)].0.clone()),
            Err(e) => {
                log::debug!("   ├─ Invalid keyword weights ({}), taking first survivor", e);
                Some(survivors[0].0.clone())
            }
        }
    }

    fn round_robin(&mut self) -> Option<String> {
        if self.base.is_empty() {
            return None;
        }
        let keyword = self.base[self.cursor % self.base.len()].clone();
        self.cursor = (self.cursor + 1) % self.base.len();
        Some(keyword)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SearchRunRecord, SqliteStore};
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            base_keywords: vec!["alpha".to_string()],
            sample_size: 1_000,
            ..SchedulerConfig::default()
        }
    }

    fn run(keyword: &str, at: i64, success: bool, new_results: i64) -> SearchRunRecord {
        SearchRunRecord {
            keyword: keyword.to_string(),
            started_at: at,
            finished_at: Some(at),
            results_count: new_results,
            new_results_count: new_results,
            success,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_cooldown_then_round_robin_fallback() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut scheduler = QueryScheduler::new(store.clone(), config());
        let total = scheduler.base_keywords().len();
        assert_eq!(total, 17);

        let mut picked = HashSet::new();
        for _ in 0..total {
            let keyword = scheduler.next_query(NOW).await.unwrap().unwrap();
            assert!(picked.insert(keyword), "keyword repeated inside cooldown");
        }

        // Everything is cooling down now
        let expected = scheduler.preview(1)[0].clone();
        assert_eq!(expected, scheduler.base_keywords()[0]);
        assert_eq!(scheduler.next_query(NOW).await.unwrap().unwrap(), expected);
        assert_eq!(scheduler.preview(1)[0], scheduler.base_keywords()[1]);

        let usage = store.keyword_usage(&expected).await.unwrap().unwrap();
        assert_eq!(usage.use_count, 2);
    }

    #[tokio::test]
    async fn test_failed_evolved_keyword_is_never_selected() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut scheduler = QueryScheduler::new(
            store.clone(),
            SchedulerConfig {
                base_weight: 1.0,
                evolved_weight: 1_000.0,
                ..config()
            },
        );
        assert!(scheduler.add_evolved("beta"));
        store.record_search_run(&run("beta", NOW - 60, false, 0)).await.unwrap();

        for _ in 0..30 {
            let keyword = scheduler.next_query(NOW).await.unwrap().unwrap();
            assert_ne!(keyword, "beta");
        }
    }

    #[tokio::test]
    async fn test_evolved_keyword_preferred_when_eligible() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut scheduler = QueryScheduler::new(
            store.clone(),
            SchedulerConfig {
                base_weight: 0.0,
                evolved_weight: 3.0,
                ..config()
            },
        );
        scheduler.add_evolved("gamma");

        // Unproductive, but long enough ago to be retried
        let window = SchedulerConfig::default().failure_backoff.as_secs() as i64;
        store.record_search_run(&run("gamma", NOW - 2 * window, true, 0)).await.unwrap();

        assert_eq!(scheduler.next_query(NOW).await.unwrap().as_deref(), Some("gamma"));
    }

    #[tokio::test]
    async fn test_zero_new_results_inside_window_is_skipped() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let scheduler = QueryScheduler::new(store.clone(), config());

        store.record_search_run(&run("alpha", NOW - 100, true, 0)).await.unwrap();
        store.record_search_run(&run("alpha chat", NOW - 100, true, 3)).await.unwrap();

        assert!(!scheduler.is_eligible("alpha", NOW).await.unwrap());
        assert!(scheduler.is_eligible("alpha chat", NOW).await.unwrap());
        assert!(scheduler.is_eligible("alpha group", NOW).await.unwrap());
    }

    #[tokio::test]
    async fn test_cooldown_expires() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let scheduler = QueryScheduler::new(
            store.clone(),
            SchedulerConfig {
                cooldown: Duration::from_secs(600),
                ..config()
            },
        );
        store.record_keyword_usage("alpha", NOW).await.unwrap();

        assert!(!scheduler.is_eligible("alpha", NOW + 599).await.unwrap());
        assert!(scheduler.is_eligible("alpha", NOW + 600).await.unwrap());
    }

    #[test]
    fn test_base_keywords_are_not_evolved() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut scheduler = QueryScheduler::new(store, config());
        assert!(!scheduler.add_evolved("Alpha Chat"));
        assert!(scheduler.add_evolved("delta"));
        assert_eq!(scheduler.evolution().len(), 1);
    }
}
