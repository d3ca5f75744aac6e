//! Rate-limit aware retries on top of the request limiter
//!
//! Two kinds of rate limiting are handled here:
//!
//! - **Hard**: the client reports `FloodWait { seconds }`. We sleep the
//!   required time plus 1..=J seconds of jitter and retry.
//! - **Ambiguous**: the failure only looks like a rate limit (error text or
//!   420/429 code). We sleep `min(max, base * 2^level)` plus up to 25% jitter
//!   and bump the category's level. Any success resets the level.
//!
//! After `max_attempts` rate-limited tries the call fails with
//! `GatewayError::RateLimited` and a `DeferredRetry` is queued for the
//! crawler to replay later. Every other error passes straight through.

use crate::config::BackoffConfig;
use crate::control::ControlSignal;
use crate::gateway::{Category, GatewayError, RequestLimiter};
use crate::telegram::ClientError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

const AMBIGUOUS_PATTERNS: [&str; 7] = [
    "flood",
    "too many",
    "slow down",
    "slowmode",
    "limit reached",
    "rate limit",
    "try again later",
];

/// True when `err` looks like a rate limit but carries no explicit wait
pub fn is_ambiguous_rate_limit(err: &ClientError) -> bool {
    let text = match err {
        ClientError::FloodWait { .. } => return false,
        ClientError::Rpc { code, message } => {
            if *code == 420 || *code == 429 {
                return true;
            }
            message.to_lowercase()
        }
        ClientError::Transport(message) => message.to_lowercase(),
        ClientError::NotFound(_) | ClientError::Restricted(_) => return false,
    };

    AMBIGUOUS_PATTERNS.iter().any(|pattern| text.contains(pattern))
}

/// An operation that exhausted its local retries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredRetry {
    pub category: Category,
    pub target: String,
    pub not_before: Instant,
}

#[derive(Debug, Default)]
struct BackoffState {
    levels: HashMap<Category, u32>,
    deferred: Vec<DeferredRetry>,
}

pub struct BackoffController {
    limiter: Arc<RequestLimiter>,
    control: ControlSignal,
    config: BackoffConfig,
    state: Mutex<BackoffState>,
    rng: Mutex<StdRng>,
}

impl BackoffController {
    pub fn new(limiter: Arc<RequestLimiter>, control: ControlSignal, config: BackoffConfig) -> Self {
        Self::with_rng(limiter, control, config, StdRng::from_entropy())
    }

    pub fn with_rng(
        limiter: Arc<RequestLimiter>,
        control: ControlSignal,
        config: BackoffConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            limiter,
            control,
            config,
            state: Mutex::new(BackoffState::default()),
            rng: Mutex::new(rng),
        }
    }

    /// Run `op` through the limiter, retrying on rate limits
    ///
    /// # Arguments
    /// * `category` - Limiter category, also keys the ambiguous backoff level
    /// * `target` - What the call is about (query, username); recorded on deferral
    /// * `op` - Produces a fresh attempt each time it is called
    pub async fn call<T, F, Fut>(&self, category: Category, target: &str, mut op: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self.limiter.run(category, || op()).await?;

            let err = match result {
                Ok(value) => {
                    self.reset_level(category);
                    return Ok(value);
                }
                Err(err) => err,
            };

            let (wait, retry_after) = match &err {
                ClientError::FloodWait { seconds } => {
                    let required = Duration::from_secs(*seconds);
                    (required + self.hard_jitter(), Some(required))
                }
                e if is_ambiguous_rate_limit(e) => (self.next_ambiguous_wait(category), None),
                _ => return Err(GatewayError::Client(err)),
            };

            if attempt >= max_attempts {
                log::warn!(
                    "🚫 {} rate limited for '{}' after {} attempts, deferring",
                    category,
                    target,
                    attempt
                );
                self.defer(category, target, wait);
                return Err(GatewayError::RateLimited { category, retry_after });
            }

            log::warn!(
                "⏳ {} rate limited ({}), retry {} of {} in {:.1}s",
                category,
                err,
                attempt + 1,
                max_attempts,
                wait.as_secs_f64()
            );
            self.control.sleep(wait).await?;
        }
    }

    /// Un-jittered ambiguous wait for a given level
    pub fn ambiguous_wait(&self, level: u32) -> Duration {
        let factor = 2u32.saturating_pow(level);
        self.config
            .ambiguous_base
            .checked_mul(factor)
            .unwrap_or(self.config.ambiguous_max)
            .min(self.config.ambiguous_max)
    }

    pub fn level(&self, category: Category) -> u32 {
        self.lock_state().levels.get(&category).copied().unwrap_or(0)
    }

    /// Remove and return every deferred retry whose `not_before` has passed
    pub fn take_due_retries(&self, now: Instant) -> Vec<DeferredRetry> {
        let mut state = self.lock_state();
        let (due, pending): (Vec<_>, Vec<_>) = state
            .deferred
            .drain(..)
            .partition(|retry| retry.not_before <= now);
        state.deferred = pending;
        due
    }

    pub fn pending_retries(&self) -> usize {
        self.lock_state().deferred.len()
    }

    fn next_ambiguous_wait(&self, category: Category) -> Duration {
        let level = {
            let mut state = self.lock_state();
            let level = state.levels.entry(category).or_insert(0);
            let current = *level;
            *level = (*level + 1).min(self.config.max_level);
            current
        };

        let wait = self.ambiguous_wait(level);
        let jitter_ceiling = wait.as_millis() as u64 / 4;
        let jitter = if jitter_ceiling == 0 {
            0
        } else {
            self.lock_rng().gen_range(0..=jitter_ceiling)
        };
        wait + Duration::from_millis(jitter)
    }

    fn hard_jitter(&self) -> Duration {
        let ceiling = (self.config.hard_jitter_max.as_millis() as u64).max(1_000);
        Duration::from_millis(self.lock_rng().gen_range(1_000..=ceiling))
    }

    fn reset_level(&self, category: Category) {
        let mut state = self.lock_state();
        if let Some(level) = state.levels.get_mut(&category) {
            if *level > 0 {
                log::debug!("✅ {} succeeded, backoff level reset", category);
            }
            *level = 0;
        }
    }

    fn defer(&self, category: Category, target: &str, wait: Duration) {
        self.lock_state().deferred.push(DeferredRetry {
            category,
            target: target.to_string(),
            not_before: Instant::now() + wait,
        });
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BackoffState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_rng(&self) -> std::sync::MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThrottleConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn controller(config: BackoffConfig) -> (BackoffController, ControlSignal) {
        let control = ControlSignal::new();
        let mut throttle = ThrottleConfig::default();
        for category in Category::ALL {
            throttle.intervals.insert(category, Duration::from_millis(10));
        }
        let limiter = Arc::new(RequestLimiter::new(throttle, control.clone()));
        let backoff = BackoffController::with_rng(limiter, control.clone(), config, StdRng::seed_from_u64(7));
        (backoff, control)
    }

    fn ambiguous() -> ClientError {
        ClientError::Rpc { code: 500, message: "Too many requests, slow down".to_string() }
    }

    #[test]
    fn test_ambiguous_detection() {
        assert!(is_ambiguous_rate_limit(&ambiguous()));
        assert!(is_ambiguous_rate_limit(&ClientError::Rpc { code: 420, message: "x".into() }));
        assert!(is_ambiguous_rate_limit(&ClientError::Transport("Rate limit hit".into())));
        assert!(is_ambiguous_rate_limit(&ClientError::Rpc { code: 400, message: "SLOWMODE_WAIT".into() }));
        assert!(!is_ambiguous_rate_limit(&ClientError::FloodWait { seconds: 3 }));
        assert!(!is_ambiguous_rate_limit(&ClientError::NotFound("flood".into())));
        assert!(!is_ambiguous_rate_limit(&ClientError::Rpc { code: 400, message: "CHANNEL_INVALID".into() }));
    }

    #[test]
    fn test_ambiguous_waits_increase_until_cap() {
        let (backoff, _) = controller(BackoffConfig {
            ambiguous_base: Duration::from_secs(1),
            ambiguous_max: Duration::from_secs(60),
            ..BackoffConfig::default()
        });

        let waits: Vec<Duration> = (0..=6).map(|level| backoff.ambiguous_wait(level)).collect();
        for pair in waits.windows(2) {
            assert!(pair[1] > pair[0]);
        }
        assert_eq!(waits[6], Duration::from_secs(60));
        assert_eq!(backoff.ambiguous_wait(7), Duration::from_secs(60));
        assert_eq!(backoff.ambiguous_wait(40), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_wait_sleeps_required_plus_jitter() {
        let (backoff, _) = controller(BackoffConfig {
            hard_jitter_max: Duration::from_secs(3),
            ..BackoffConfig::default()
        });
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let value = backoff
            .call(Category::Search, "ielts", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ClientError::FloodWait { seconds: 10 })
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();

        let elapsed = start.elapsed();
        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(elapsed >= Duration::from_secs(11), "waited {:?}", elapsed);
        assert!(elapsed <= Duration::from_secs(14), "waited {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_hard_limit_defers() {
        let (backoff, _) = controller(BackoffConfig {
            max_attempts: 2,
            ..BackoffConfig::default()
        });

        let err = backoff
            .call(Category::Join, "ielts_club", || async {
                Err::<(), _>(ClientError::FloodWait { seconds: 30 })
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            GatewayError::RateLimited {
                category: Category::Join,
                retry_after: Some(Duration::from_secs(30)),
            }
        );
        assert_eq!(backoff.pending_retries(), 1);
        assert!(backoff.take_due_retries(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_secs(40)).await;
        let due = backoff.take_due_retries(Instant::now());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].target, "ielts_club");
        assert_eq!(due[0].category, Category::Join);
        assert_eq!(backoff.pending_retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ambiguous_level_grows_and_resets_on_success() {
        let (backoff, _) = controller(BackoffConfig {
            max_attempts: 3,
            ambiguous_base: Duration::from_secs(1),
            ambiguous_max: Duration::from_secs(60),
            ..BackoffConfig::default()
        });

        let err = backoff
            .call(Category::Search, "q", || async { Err::<(), _>(ambiguous()) })
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(backoff.level(Category::Search), 3);
        assert_eq!(backoff.level(Category::Resolve), 0);

        backoff.call(Category::Search, "q", || async { Ok(()) }).await.unwrap();
        assert_eq!(backoff.level(Category::Search), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jittered_ambiguous_sleeps_strictly_increase() {
        let config = BackoffConfig {
            max_attempts: 7,
            ambiguous_base: Duration::from_secs(1),
            ambiguous_max: Duration::from_secs(60),
            ..BackoffConfig::default()
        };

        for seed in 0..5 {
            let control = ControlSignal::new();
            let mut throttle = ThrottleConfig::default();
            throttle.intervals.insert(Category::Search, Duration::from_millis(10));
            let limiter = Arc::new(RequestLimiter::new(throttle, control.clone()));
            let backoff = BackoffController::with_rng(limiter, control, config.clone(), StdRng::seed_from_u64(seed));
            let stamps = Mutex::new(Vec::new());

            let err = backoff
                .call(Category::Search, "q", || {
                    stamps.lock().unwrap().push(Instant::now());
                    async { Err::<(), _>(ambiguous()) }
                })
                .await
                .unwrap_err();
            assert!(err.is_rate_limited());

            let stamps = stamps.into_inner().unwrap();
            assert_eq!(stamps.len(), 7);
            let gaps: Vec<Duration> = stamps.windows(2).map(|pair| pair[1] - pair[0]).collect();

            // Levels 0..=5 stay under the 60s cap: 1s, 2s, 4s, 8s, 16s, 32s
            for (level, gap) in gaps.iter().enumerate() {
                let floor = Duration::from_secs(1 << level);
                assert!(*gap >= floor, "seed {} level {}: {:?}", seed, level, gap);
                assert!(*gap <= floor + floor / 4 + Duration::from_millis(20), "seed {} level {}: {:?}", seed, level, gap);
            }
            for pair in gaps.windows(2) {
                assert!(pair[1] > pair[0], "seed {}: {:?}", seed, gaps);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_pass_through_without_retry() {
        let (backoff, _) = controller(BackoffConfig::default());
        let calls = AtomicU32::new(0);

        let err = backoff
            .call(Category::Resolve, "nobody", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ClientError::NotFound("nobody".into())) }
            })
            .await
            .unwrap_err();

        assert_eq!(err, GatewayError::Client(ClientError::NotFound("nobody".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(backoff.pending_retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cuts_backoff_sleep_short() {
        let (backoff, control) = controller(BackoffConfig::default());
        let backoff = Arc::new(backoff);
        let worker = backoff.clone();

        let handle = tokio::spawn(async move {
            worker
                .call(Category::Search, "q", || async {
                    Err::<(), _>(ClientError::FloodWait { seconds: 3_600 })
                })
                .await
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        control.shutdown();

        assert_eq!(handle.await.unwrap(), Err(GatewayError::Shutdown));
    }
}
