//! Persisted record types

use crate::telegram::{Candidate, EntityKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Local membership state machine: `not_joined -> joined -> {left, removed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipState {
    NotJoined,
    Joined,
    Left,
    Removed,
}

impl MembershipState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipState::NotJoined => "not_joined",
            MembershipState::Joined => "joined",
            MembershipState::Left => "left",
            MembershipState::Removed => "removed",
        }
    }
}

impl fmt::Display for MembershipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MembershipState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_joined" => Ok(MembershipState::NotJoined),
            "joined" => Ok(MembershipState::Joined),
            "left" => Ok(MembershipState::Left),
            "removed" => Ok(MembershipState::Removed),
            other => Err(format!("unknown membership state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub entity_id: i64,
    pub username: Option<String>,
    pub title: Option<String>,
    pub title_norm: String,
    pub kind: EntityKind,
    pub about: Option<String>,
    pub discovered_at: i64,
    pub last_seen_at: i64,
}

impl EntityRecord {
    pub fn to_candidate(&self) -> Candidate {
        Candidate {
            entity_id: self.entity_id,
            title: self.title.clone(),
            username: self.username.clone(),
            kind: self.kind,
            about: self.about.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MembershipRecord {
    pub entity_id: i64,
    pub state: MembershipState,
    pub joined_at: Option<i64>,
    pub left_at: Option<i64>,
    pub last_checked_at: i64,
}

impl MembershipRecord {
    pub fn not_joined(entity_id: i64, now: i64) -> Self {
        Self {
            entity_id,
            state: MembershipState::NotJoined,
            joined_at: None,
            left_at: None,
            last_checked_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRunRecord {
    pub keyword: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub results_count: i64,
    pub new_results_count: i64,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordRecord {
    pub keyword: String,
    pub last_used_at: i64,
    pub use_count: i64,
}

/// Append-only audit events, stored as JSON payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    EntityDiscovered { source_keyword: String },
    Joined { source: String },
    JoinFailed { error: String },
    MembershipLost { reason: String, old_state: MembershipState },
    MembershipSynced,
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::EntityDiscovered { .. } => "entity_discovered",
            Event::Joined { .. } => "joined",
            Event::JoinFailed { .. } => "join_failed",
            Event::MembershipLost { .. } => "membership_lost",
            Event::MembershipSynced => "membership_synced",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: i64,
    pub entity_id: Option<i64>,
    pub event: Event,
    pub created_at: i64,
}
