//! groupscout: rate-limited discovery and membership tracking for public
//! chat groups
//!
//! ## Layout
//!
//! - `cache`, `gateway` - TTL caches, request limiter and backoff controller
//! - `discovery` - query planning, suggestion, fuzzy ranking and the pipeline
//! - `scheduler` - adaptive keyword selection with evolved keywords
//! - `membership` - join confirmation, dialog sync and membership sweeps
//! - `health`, `crawler` - restriction detection and the driving loop
//! - `telegram` - protocol client seam and the HTTP bridge client
//! - `store` - SQLite persistence

pub mod cache;
pub mod config;
pub mod control;
pub mod crawler;
pub mod discovery;
pub mod gateway;
pub mod health;
pub mod membership;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod telegram;

#[cfg(test)]
mod testing;

pub use config::AppConfig;
pub use control::{ControlSignal, Shutdown};
pub use runtime::Runtime;
