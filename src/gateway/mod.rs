//! Rate-controlled access to the protocol client
//!
//! Two layers wrap every remote call:
//! - `RequestLimiter`: global concurrency ceiling plus per-category spacing
//! - `BackoffController`: hard/ambiguous rate-limit handling on top of the limiter
//!
//! Callers only ever see `GatewayError`.

pub mod backoff;
pub mod limiter;

pub use backoff::{is_ambiguous_rate_limit, BackoffController, DeferredRetry};
pub use limiter::RequestLimiter;

use crate::telegram::ClientError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Request category. Each one carries its own dispatch interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Search,
    Resolve,
    Join,
    MembershipCheck,
    SendMessage,
    ListDialogs,
    Default,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Search,
        Category::Resolve,
        Category::Join,
        Category::MembershipCheck,
        Category::SendMessage,
        Category::ListDialogs,
        Category::Default,
    ];

    pub fn default_interval(&self) -> Duration {
        let ms = match self {
            Category::Search => 3_000,
            Category::Resolve => 2_000,
            Category::Join => 30_000,
            Category::MembershipCheck => 2_000,
            Category::SendMessage => 5_000,
            Category::ListDialogs => 5_000,
            Category::Default => 1_000,
        };
        Duration::from_millis(ms)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Search => "search",
            Category::Resolve => "resolve",
            Category::Join => "join",
            Category::MembershipCheck => "membership_check",
            Category::SendMessage => "send_message",
            Category::ListDialogs => "list_dialogs",
            Category::Default => "default",
        }
    }

    /// Suffix used in `SCOUT_INTERVAL_<SUFFIX>_MS`
    pub fn env_suffix(&self) -> String {
        self.as_str().to_uppercase()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Local retries exhausted; a deferred retry has been queued
    #[error("rate limited on {category} (retry after {retry_after:?})")]
    RateLimited {
        category: Category,
        retry_after: Option<Duration>,
    },

    #[error("shutdown requested")]
    Shutdown,
}

impl From<crate::control::Shutdown> for GatewayError {
    fn from(_: crate::control::Shutdown) -> Self {
        GatewayError::Shutdown
    }
}

impl GatewayError {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, GatewayError::Shutdown)
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GatewayError::RateLimited { .. })
    }
}
