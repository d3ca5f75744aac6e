//! Component wiring shared by the binary and the integration tests

use crate::config::AppConfig;
use crate::control::ControlSignal;
use crate::crawler::Crawler;
use crate::discovery::{DiscoveryPipeline, LlmSuggester, SuggestionStrategy};
use crate::gateway::{BackoffController, RequestLimiter};
use crate::health::HealthMonitor;
use crate::membership::MembershipTracker;
use crate::scheduler::QueryScheduler;
use crate::store::Store;
use crate::telegram::ProtocolClient;
use std::sync::Arc;

/// One control signal, one limiter and one backoff controller shared by
/// every component built from this runtime
pub struct Runtime {
    pub config: AppConfig,
    pub control: ControlSignal,
    pub client: Arc<dyn ProtocolClient>,
    pub store: Arc<dyn Store>,
    pub backoff: Arc<BackoffController>,
    strategy: SuggestionStrategy,
}

impl Runtime {
    pub fn new(config: AppConfig, client: Arc<dyn ProtocolClient>, store: Arc<dyn Store>) -> Self {
        let control = ControlSignal::new();
        let limiter = Arc::new(RequestLimiter::new(config.throttle.clone(), control.clone()));
        let backoff = Arc::new(BackoffController::new(limiter, control.clone(), config.backoff.clone()));
        let strategy = build_strategy(&config);

        Self {
            config,
            control,
            client,
            store,
            backoff,
            strategy,
        }
    }

    pub fn strategy(&self) -> &SuggestionStrategy {
        &self.strategy
    }

    pub fn discovery(&self) -> DiscoveryPipeline {
        DiscoveryPipeline::new(
            self.client.clone(),
            self.backoff.clone(),
            self.store.clone(),
            self.control.clone(),
            self.strategy.clone(),
            self.config.discovery.clone(),
            self.config.cache.clone(),
        )
    }

    pub fn scheduler(&self) -> QueryScheduler {
        QueryScheduler::new(self.store.clone(), self.config.scheduler.clone())
    }

    pub fn tracker(&self) -> MembershipTracker {
        MembershipTracker::new(
            self.client.clone(),
            self.backoff.clone(),
            self.store.clone(),
            self.control.clone(),
            self.config.membership.clone(),
        )
    }

    pub fn health(&self) -> HealthMonitor {
        HealthMonitor::new(
            self.client.clone(),
            self.backoff.clone(),
            self.control.clone(),
            self.config.health.clone(),
        )
    }

    pub fn crawler(&self) -> Crawler {
        Crawler::new(
            self.discovery(),
            self.scheduler(),
            Arc::new(self.tracker()),
            self.health(),
            self.backoff.clone(),
            self.store.clone(),
            self.control.clone(),
            self.config.crawler.clone(),
        )
    }
}

fn build_strategy(config: &AppConfig) -> SuggestionStrategy {
    let Some(suggester) = config.suggester.clone() else {
        log::info!("🧩 Keyword suggestions: rule-based");
        return SuggestionStrategy::RuleBased;
    };

    let model = suggester.model.clone();
    match LlmSuggester::new(suggester) {
        Ok(llm) => {
            log::info!("🤖 Keyword suggestions: {} (rule-based fallback)", model);
            SuggestionStrategy::Ai(Arc::new(llm))
        }
        Err(e) => {
            log::warn!("⚠️  Could not build keyword suggester ({}), using rule-based", e);
            SuggestionStrategy::RuleBased
        }
    }
}
