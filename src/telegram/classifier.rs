//! Raw peer to `Candidate` classification

use super::{RawEntity, RawPeer};
use crate::discovery::normalize::normalize_username;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Group,
    Channel,
    User,
    Bot,
    Unknown,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Group => "group",
            EntityKind::Channel => "channel",
            EntityKind::User => "user",
            EntityKind::Bot => "bot",
            EntityKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "group" => Ok(EntityKind::Group),
            "channel" => Ok(EntityKind::Channel),
            "user" => Ok(EntityKind::User),
            "bot" => Ok(EntityKind::Bot),
            "unknown" => Ok(EntityKind::Unknown),
            other => Err(format!("unknown entity kind '{}'", other)),
        }
    }
}

/// A classified, normalized search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub entity_id: i64,
    pub title: Option<String>,
    /// Normalized: lowercase, no `@`
    pub username: Option<String>,
    pub kind: EntityKind,
    pub about: Option<String>,
}

impl Candidate {
    /// Identifier to hand back to the protocol client: the username when
    /// there is one, otherwise the numeric id
    pub fn identifier(&self) -> String {
        match &self.username {
            Some(username) => username.clone(),
            None => self.entity_id.to_string(),
        }
    }

    /// Human readable label for log lines
    pub fn label(&self) -> String {
        match (&self.title, &self.username) {
            (Some(title), Some(username)) => format!("{} (@{})", title, username),
            (Some(title), None) => title.clone(),
            (None, Some(username)) => format!("@{}", username),
            (None, None) => format!("#{}", self.entity_id),
        }
    }
}

/// Map a raw bridge entity to a `Candidate`
///
/// A channel-shaped peer carrying neither the broadcast nor the megagroup
/// flag is treated as a group. Basic groups never carry a username.
pub fn classify(raw: &RawEntity) -> Candidate {
    let username = raw.username.as_deref().and_then(normalize_username);

    let (kind, title, username) = match &raw.peer {
        RawPeer::User { first_name, last_name, bot } => {
            let full = format!(
                "{} {}",
                first_name.as_deref().unwrap_or(""),
                last_name.as_deref().unwrap_or("")
            );
            let full = full.trim();
            let title = if full.is_empty() { None } else { Some(full.to_string()) };
            let kind = if *bot { EntityKind::Bot } else { EntityKind::User };
            (kind, title, username)
        }
        RawPeer::BasicGroup => (EntityKind::Group, raw.title.clone(), None),
        RawPeer::Channel { broadcast, .. } => {
            let kind = if *broadcast { EntityKind::Channel } else { EntityKind::Group };
            (kind, raw.title.clone(), username)
        }
        RawPeer::Unknown => (EntityKind::Unknown, raw.title.clone(), username),
    };

    Candidate {
        entity_id: raw.id,
        title,
        username,
        kind,
        about: raw.about.clone(),
    }
}
