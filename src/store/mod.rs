//! Persistence layer
//!
//! Tables (see `/sql/` directory):
//! - `entities` - UPSERT on entity_id
//! - `memberships` - one row per entity, state machine
//! - `search_runs` - INSERT per processed keyword
//! - `keyword_usage` - UPSERT on keyword
//! - `events` - INSERT (append-only audit log)
//!
//! All timestamps are Unix seconds. Every write is a single statement or a
//! single transaction, so an interrupted run never leaves partial state.

pub mod models;
pub mod sqlite;

pub use models::{
    EntityRecord, Event, KeywordRecord, MembershipRecord, MembershipState, SearchRunRecord,
    StoredEvent,
};
pub use sqlite::SqliteStore;

use crate::telegram::Candidate;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("event payload error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store connection lock poisoned")]
    Poisoned,
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Current time in Unix seconds
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or refresh an entity. Returns `true` when the row was created.
    async fn upsert_entity(&self, candidate: &Candidate, now: i64) -> Result<bool, StoreError>;

    async fn get_entity(&self, entity_id: i64) -> Result<Option<EntityRecord>, StoreError>;

    /// Exact match on the normalized username
    async fn find_entity_by_username(&self, username: &str) -> Result<Option<EntityRecord>, StoreError>;

    /// Exact match on the normalized title
    async fn find_entity_by_title(&self, title_norm: &str) -> Result<Option<EntityRecord>, StoreError>;

    /// Most recently discovered first
    async fn recent_entities(&self, limit: usize) -> Result<Vec<EntityRecord>, StoreError>;

    /// Create a `not_joined` membership row unless one already exists
    async fn ensure_membership(&self, entity_id: i64, now: i64) -> Result<(), StoreError>;

    async fn get_membership(&self, entity_id: i64) -> Result<Option<MembershipRecord>, StoreError>;

    /// Write a membership row and, optionally, its event in one transaction
    async fn save_membership(
        &self,
        record: &MembershipRecord,
        event: Option<&Event>,
        now: i64,
    ) -> Result<(), StoreError>;

    async fn list_memberships(&self, state: MembershipState) -> Result<Vec<MembershipRecord>, StoreError>;

    async fn record_event(&self, entity_id: Option<i64>, event: &Event, now: i64) -> Result<(), StoreError>;

    async fn events_for(&self, entity_id: i64) -> Result<Vec<StoredEvent>, StoreError>;

    async fn record_search_run(&self, run: &SearchRunRecord) -> Result<(), StoreError>;

    async fn last_search_run(&self, keyword: &str) -> Result<Option<SearchRunRecord>, StoreError>;

    async fn record_keyword_usage(&self, keyword: &str, now: i64) -> Result<(), StoreError>;

    async fn keyword_usage(&self, keyword: &str) -> Result<Option<KeywordRecord>, StoreError>;
}
