//! Global concurrency ceiling plus per-category dispatch spacing
//!
//! `run` acquires a permit from one shared semaphore, then takes the
//! category's FIFO lock, waits out the remaining interval, stamps the next
//! allowed dispatch time and releases the lock before invoking the operation.
//! The permit is held until the operation completes.

use crate::config::ThrottleConfig;
use crate::control::{ControlSignal, Shutdown};
use crate::gateway::Category;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

#[derive(Debug, Default)]
struct ThrottleState {
    next_allowed_at: Option<Instant>,
}

pub struct RequestLimiter {
    semaphore: Semaphore,
    states: HashMap<Category, Mutex<ThrottleState>>,
    config: ThrottleConfig,
    control: ControlSignal,
}

impl RequestLimiter {
    pub fn new(config: ThrottleConfig, control: ControlSignal) -> Self {
        let states = Category::ALL
            .iter()
            .map(|c| (*c, Mutex::new(ThrottleState::default())))
            .collect();

        Self {
            semaphore: Semaphore::new(config.max_concurrency.max(1)),
            states,
            config,
            control,
        }
    }

    /// Dispatch `op` under `category`'s spacing rules
    ///
    /// Returns `Err(Shutdown)` if shutdown is requested while waiting for a
    /// permit or for the category interval to elapse. `op` is never invoked
    /// in that case.
    pub async fn run<T, F, Fut>(&self, category: Category, op: F) -> Result<T, Shutdown>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.control.check()?;
        let _permit = tokio::select! {
            permit = self.semaphore.acquire() => permit.map_err(|_| Shutdown)?,
            _ = self.control.wait_for_shutdown() => return Err(Shutdown),
        };

        self.reserve_slot(category).await?;

        Ok(op().await)
    }

    async fn reserve_slot(&self, category: Category) -> Result<(), Shutdown> {
        let lock = match self.states.get(&category) {
            Some(lock) => lock,
            None => return Ok(()),
        };

        let mut state = lock.lock().await;
        if let Some(next) = state.next_allowed_at {
            if next > Instant::now() {
                log::trace!("⏱️  {} throttled for {:?}", category, next - Instant::now());
                self.control.sleep_until(next).await?;
            }
        }

        state.next_allowed_at = Some(Instant::now() + self.config.interval(category));
        Ok(())
    }
}
