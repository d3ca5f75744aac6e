//! Messaging platform seam
//!
//! Everything above this module talks to the platform through the
//! `ProtocolClient` trait. The production implementation is
//! `HttpGatewayClient`, which speaks a small JSON contract to a local bridge
//! process that owns the actual session. Tests substitute scripted clients.

pub mod classifier;
pub mod gateway_client;

pub use classifier::{classify, Candidate, EntityKind};
pub use gateway_client::HttpGatewayClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Failure taxonomy reported by a protocol client
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Hard rate limit: the platform told us exactly how long to wait
    #[error("flood wait of {seconds}s required")]
    FloodWait { seconds: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    /// Account-level restriction (peer flood, user restricted, banned)
    #[error("account restricted: {0}")]
    Restricted(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// Raw peer shape as reported by the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawPeer {
    User {
        #[serde(default)]
        first_name: Option<String>,
        #[serde(default)]
        last_name: Option<String>,
        #[serde(default)]
        bot: bool,
    },
    BasicGroup,
    Channel {
        #[serde(default)]
        broadcast: bool,
        #[serde(default)]
        megagroup: bool,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntity {
    pub id: i64,
    pub peer: RawPeer,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub scam: bool,
    #[serde(default)]
    pub fake: bool,
}

impl RawEntity {
    /// A public supergroup
    pub fn group(id: i64, title: &str, username: Option<&str>) -> Self {
        Self::channel_like(id, title, username, false, true)
    }

    /// A broadcast channel
    pub fn channel(id: i64, title: &str, username: Option<&str>) -> Self {
        Self::channel_like(id, title, username, true, false)
    }

    pub fn user(id: i64, first_name: &str, username: Option<&str>, bot: bool) -> Self {
        Self {
            id,
            peer: RawPeer::User {
                first_name: Some(first_name.to_string()),
                last_name: None,
                bot,
            },
            title: None,
            username: username.map(str::to_string),
            about: None,
            scam: false,
            fake: false,
        }
    }

    pub fn with_about(mut self, about: &str) -> Self {
        self.about = Some(about.to_string());
        self
    }

    fn channel_like(id: i64, title: &str, username: Option<&str>, broadcast: bool, megagroup: bool) -> Self {
        Self {
            id,
            peer: RawPeer::Channel { broadcast, megagroup },
            title: Some(title.to_string()),
            username: username.map(str::to_string),
            about: None,
            scam: false,
            fake: false,
        }
    }
}

/// Result of a single membership check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Joined,
    Left,
    Banned,
    Unknown,
}

#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<RawEntity>, ClientError>;

    async fn resolve(&self, identifier: &str) -> Result<RawEntity, ClientError>;

    async fn join(&self, identifier: &str) -> Result<(), ClientError>;

    async fn check_membership(&self, identifier: &str) -> Result<MembershipStatus, ClientError>;

    async fn list_joined_groups(&self) -> Result<Vec<RawEntity>, ClientError>;

    /// Returns the id of the sent message
    async fn send_message(&self, identifier: &str, text: &str) -> Result<i64, ClientError>;

    async fn delete_message(&self, identifier: &str, message_id: i64) -> Result<(), ClientError>;
}
