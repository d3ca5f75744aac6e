//! Driving loop: scheduler -> keyword -> discovery -> persistence -> join
//!
//! Each iteration waits out a pause, runs the health check, replays due
//! deferred retries, processes one batch of scheduled keywords, evolves the
//! keyword pool from fresh discoveries and then sleeps until the next batch.
//! Every wait is interruptible by shutdown, which ends the loop cleanly.

use crate::config::CrawlerConfig;
use crate::control::{ControlSignal, Shutdown};
use crate::discovery::{
    Attempt, AttemptResult, DiscoveryError, DiscoveryOutcome, DiscoveryPipeline, DiscoveryStatus,
};
use crate::gateway::{BackoffController, Category, DeferredRetry};
use crate::health::{HealthMonitor, HealthStatus};
use crate::membership::{JoinOutcome, MembershipTracker, TrackerError};
use crate::scheduler::QueryScheduler;
use crate::store::{unix_now, EntityRecord, Event, SearchRunRecord, Store, StoreError};
use crate::telegram::EntityKind;
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordReport {
    pub keyword: String,
    pub status: Option<DiscoveryStatus>,
    pub results: usize,
    pub new_entities: Vec<i64>,
    pub joined: usize,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub iterations: usize,
    pub keywords: usize,
    pub new_entities: usize,
    pub joined: usize,
    pub replayed: usize,
}

pub struct Crawler {
    pipeline: DiscoveryPipeline,
    scheduler: QueryScheduler,
    tracker: Arc<MembershipTracker>,
    health: HealthMonitor,
    backoff: Arc<BackoffController>,
    store: Arc<dyn Store>,
    control: ControlSignal,
    config: CrawlerConfig,
}

impl Crawler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipeline: DiscoveryPipeline,
        scheduler: QueryScheduler,
        tracker: Arc<MembershipTracker>,
        health: HealthMonitor,
        backoff: Arc<BackoffController>,
        store: Arc<dyn Store>,
        control: ControlSignal,
        config: CrawlerConfig,
    ) -> Self {
        Self {
            pipeline,
            scheduler,
            tracker,
            health,
            backoff,
            store,
            control,
            config,
        }
    }

    pub fn scheduler(&self) -> &QueryScheduler {
        &self.scheduler
    }

    /// Run until shutdown, or until `iterations` batches are done
    pub async fn run(&mut self, iterations: Option<usize>) -> CrawlStats {
        let mut stats = CrawlStats::default();
        log::info!("🚀 Crawler started (batch size {})", self.config.batch_size);

        match self.run_loop(iterations, &mut stats).await {
            Ok(()) => log::info!("🏁 Crawler finished after {} iterations", stats.iterations),
            Err(Shutdown) => log::info!("🛑 Crawler stopped by shutdown after {} iterations", stats.iterations),
        }

        log::info!(
            "📊 {} keywords, {} new entities, {} joined, {} retries replayed",
            stats.keywords,
            stats.new_entities,
            stats.joined,
            stats.replayed
        );
        stats
    }

    async fn run_loop(&mut self, iterations: Option<usize>, stats: &mut CrawlStats) -> Result<(), Shutdown> {
        loop {
            if iterations.is_some_and(|limit| stats.iterations >= limit) {
                return Ok(());
            }

            self.control.wait_until_resumed_or_shutdown().await?;

            match self.health.check().await? {
                HealthStatus::Restricted(reason) => {
                    log::warn!("⏸️  Skipping batch, account restricted: {}", reason);
                    continue;
                }
                HealthStatus::Unhealthy(reason) => {
                    log::warn!("⚠️  Health check inconclusive ({}), continuing", reason);
                }
                HealthStatus::Healthy => {}
            }

            for retry in self.backoff.take_due_retries(Instant::now()) {
                self.replay(retry, stats).await?;
            }

            for _ in 0..self.config.batch_size {
                let keyword = match self.scheduler.next_query(unix_now()).await {
                    Ok(Some(keyword)) => keyword,
                    Ok(None) => {
                        log::info!("📭 Scheduler has no keyword available");
                        break;
                    }
                    Err(e) => {
                        log::error!("❌ Scheduler store error: {}", e);
                        break;
                    }
                };

                let report = self.process_keyword(&keyword).await?;
                stats.keywords += 1;
                stats.new_entities += report.new_entities.len();
                stats.joined += report.joined;
            }

            self.evolve_keywords().await;
            stats.iterations += 1;

            if iterations.is_some_and(|limit| stats.iterations >= limit) {
                return Ok(());
            }

            log::info!("💤 Next batch in {}s", self.config.batch_interval.as_secs());
            self.control.sleep(self.config.batch_interval).await?;
        }
    }

    /// Discover `keyword`, persist what matched, auto-join new groups and
    /// record the search run
    ///
    /// Only shutdown is returned as an error. Persistence failures mark the
    /// run unsuccessful and are otherwise swallowed.
    pub async fn process_keyword(&mut self, keyword: &str) -> Result<KeywordReport, Shutdown> {
        log::info!("🔑 Processing keyword '{}'", keyword);
        let started_at = unix_now();

        let mut report = KeywordReport {
            keyword: keyword.to_string(),
            status: None,
            results: 0,
            new_entities: Vec::new(),
            joined: 0,
            success: false,
            error: None,
        };

        let outcome = match self.pipeline.discover(keyword).await {
            Ok(outcome) => outcome,
            Err(DiscoveryError::Shutdown) => return Err(Shutdown),
            Err(DiscoveryError::Store(e)) => {
                log::error!("❌ Discovery for '{}' failed on the store: {}", keyword, e);
                report.error = Some(e.to_string());
                self.finish_run(&report, started_at).await;
                return Ok(report);
            }
        };

        report.status = Some(outcome.status);
        report.results = outcome.candidates.len();

        let new_entities = match self.persist_matches(keyword, &outcome).await {
            Ok(new_entities) => new_entities,
            Err(e) => {
                log::error!("❌ Persisting results for '{}' failed: {}", keyword, e);
                report.error = Some(e.to_string());
                self.finish_run(&report, started_at).await;
                return Ok(report);
            }
        };
        report.new_entities = new_entities.iter().map(|e| e.entity_id).collect();

        if self.config.enable_auto_join {
            for entity in new_entities.iter().filter(|e| e.kind == EntityKind::Group) {
                match self.tracker.join(entity, keyword).await {
                    Ok(JoinOutcome::Joined) => report.joined += 1,
                    Ok(_) => {}
                    Err(TrackerError::Shutdown) => return Err(Shutdown),
                    Err(e) => log::error!("❌ Auto-join of {} failed: {}", entity.entity_id, e),
                }
            }
        }

        if outcome.all_searches_failed() {
            report.error = outcome.attempts.iter().rev().find_map(|a| match a {
                Attempt::Search {
                    outcome: AttemptResult::Failed { error },
                    ..
                } => Some(error.clone()),
                _ => None,
            });
        } else {
            report.success = true;
        }

        log::info!(
            "   └─ '{}': {:?}, {} results, {} new, {} joined",
            keyword,
            outcome.status,
            report.results,
            report.new_entities.len(),
            report.joined
        );

        self.finish_run(&report, started_at).await;
        Ok(report)
    }

    /// Store every candidate at or above the medium threshold
    ///
    /// Returns the entities that did not exist before this keyword ran.
    async fn persist_matches(&self, keyword: &str, outcome: &DiscoveryOutcome) -> Result<Vec<EntityRecord>, StoreError> {
        let threshold = self.pipeline.medium_threshold();
        let mut new_ids: Vec<i64> = outcome.created_entities.clone();

        for ranked in outcome.candidates.iter().filter(|r| r.score >= threshold) {
            let now = unix_now();
            let created = self.store.upsert_entity(&ranked.candidate, now).await?;
            self.store.ensure_membership(ranked.candidate.entity_id, now).await?;
            if created && !new_ids.contains(&ranked.candidate.entity_id) {
                new_ids.push(ranked.candidate.entity_id);
            }
        }

        let mut new_entities = Vec::with_capacity(new_ids.len());
        for id in new_ids {
            let event = Event::EntityDiscovered {
                source_keyword: keyword.to_string(),
            };
            self.store.record_event(Some(id), &event, unix_now()).await?;
            if let Some(entity) = self.store.get_entity(id).await? {
                log::info!("   ├─ 🆕 {}", entity.to_candidate().label());
                new_entities.push(entity);
            }
        }
        Ok(new_entities)
    }

    async fn finish_run(&self, report: &KeywordReport, started_at: i64) {
        let run = SearchRunRecord {
            keyword: report.keyword.clone(),
            started_at,
            finished_at: Some(unix_now()),
            results_count: report.results as i64,
            new_results_count: report.new_entities.len() as i64,
            success: report.success,
            error: report.error.clone(),
        };
        if let Err(e) = self.store.record_search_run(&run).await {
            log::error!("❌ Failed to record search run for '{}': {}", report.keyword, e);
        }
    }

    async fn replay(&mut self, retry: DeferredRetry, stats: &mut CrawlStats) -> Result<(), Shutdown> {
        log::info!("🔁 Replaying deferred {} for '{}'", retry.category, retry.target);
        stats.replayed += 1;

        match retry.category {
            Category::Search => {
                let report = self.process_keyword(&retry.target).await?;
                stats.keywords += 1;
                stats.new_entities += report.new_entities.len();
                stats.joined += report.joined;
            }
            Category::Join => {
                let entity = match self.lookup_target(&retry.target).await {
                    Ok(Some(entity)) => entity,
                    Ok(None) => {
                        log::warn!("⚠️  Deferred join target '{}' is not stored", retry.target);
                        return Ok(());
                    }
                    Err(e) => {
                        log::error!("❌ Store error looking up '{}': {}", retry.target, e);
                        return Ok(());
                    }
                };
                match self.tracker.join(&entity, "deferred_retry").await {
                    Ok(JoinOutcome::Joined) => stats.joined += 1,
                    Ok(_) => {}
                    Err(TrackerError::Shutdown) => return Err(Shutdown),
                    Err(e) => log::error!("❌ Deferred join of '{}' failed: {}", retry.target, e),
                }
            }
            other => log::debug!("   ├─ No replay for deferred {} call", other),
        }
        Ok(())
    }

    async fn lookup_target(&self, target: &str) -> Result<Option<EntityRecord>, StoreError> {
        match target.parse::<i64>() {
            Ok(id) => self.store.get_entity(id).await,
            Err(_) => self.store.find_entity_by_username(target).await,
        }
    }

    async fn evolve_keywords(&mut self) {
        if self.config.evolution_sample == 0 {
            return;
        }
        let entities = match self.store.recent_entities(self.config.evolution_sample).await {
            Ok(entities) => entities,
            Err(e) => {
                log::error!("❌ Could not load recent entities for evolution: {}", e);
                return;
            }
        };
        self.scheduler
            .evolve(self.pipeline.strategy(), &entities, self.config.evolution_sample)
            .await;
    }
}
