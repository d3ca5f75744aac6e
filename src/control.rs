//! Pause gate and shutdown token shared by every long-running component
//!
//! One `ControlSignal` is created by the binary and cloned into the limiter,
//! backoff controller, discovery pipeline, membership tracker and crawler.
//! All of their sleeps go through it, so a shutdown unwinds the whole stack
//! with `Shutdown` instead of waiting for timers to fire.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let control = ControlSignal::new();
//! control.install_ctrl_c_handler();
//!
//! // Returns Err(Shutdown) early if ctrl-c arrives during the wait
//! control.sleep(Duration::from_secs(60)).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

/// Returned by any wait that was cut short by a shutdown request
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("shutdown requested")]
pub struct Shutdown;

#[derive(Debug, Clone, Copy, Default)]
struct ControlState {
    paused: bool,
    shutdown: bool,
}

#[derive(Debug, Clone)]
pub struct ControlSignal {
    tx: Arc<watch::Sender<ControlState>>,
}

impl Default for ControlSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ControlState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn pause(&self) {
        self.tx.send_modify(|state| state.paused = true);
        log::warn!("⏸️  Control signal paused");
    }

    pub fn resume(&self) {
        self.tx.send_modify(|state| state.paused = false);
        log::info!("▶️  Control signal resumed");
    }

    /// Request shutdown. Idempotent; also releases anyone blocked on pause.
    pub fn shutdown(&self) {
        self.tx.send_modify(|state| state.shutdown = true);
    }

    pub fn is_paused(&self) -> bool {
        self.tx.borrow().paused
    }

    pub fn is_shutting_down(&self) -> bool {
        self.tx.borrow().shutdown
    }

    /// Fails fast if shutdown was already requested
    pub fn check(&self) -> Result<(), Shutdown> {
        if self.is_shutting_down() {
            Err(Shutdown)
        } else {
            Ok(())
        }
    }

    /// Block while paused. Returns `Err(Shutdown)` if shutdown is requested.
    pub async fn wait_until_resumed_or_shutdown(&self) -> Result<(), Shutdown> {
        let mut rx = self.tx.subscribe();
        let shutdown = match rx.wait_for(|s| !s.paused || s.shutdown).await {
            Ok(state) => state.shutdown,
            Err(_) => true,
        };

        if shutdown {
            Err(Shutdown)
        } else {
            Ok(())
        }
    }

    /// Sleep until `deadline` unless shutdown arrives first. Ignores pause.
    pub async fn sleep_until(&self, deadline: Instant) -> Result<(), Shutdown> {
        self.check()?;
        tokio::select! {
            _ = sleep_until(deadline) => Ok(()),
            _ = self.wait_for_shutdown() => Err(Shutdown),
        }
    }

    /// Sleep for `duration`, then hold while paused
    pub async fn sleep(&self, duration: Duration) -> Result<(), Shutdown> {
        self.sleep_until(Instant::now() + duration).await?;
        self.wait_until_resumed_or_shutdown().await
    }

    /// Trigger shutdown on the first ctrl-c
    pub fn install_ctrl_c_handler(&self) {
        let control = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("🛑 Received shutdown signal (Ctrl+C)");
                control.shutdown();
            }
        });
    }

    /// Resolves once shutdown has been requested
    pub(crate) async fn wait_for_shutdown(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|s| s.shutdown).await;
    }
}
