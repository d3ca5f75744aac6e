//! Account restriction detection
//!
//! Sends a benign message to the account's own saved-messages peer and
//! deletes it again. A restriction error pauses the shared control signal so nothing else hits
//! the platform until an operator resumes it.

use crate::config::HealthConfig;
use crate::control::{ControlSignal, Shutdown};
use crate::gateway::{BackoffController, Category, GatewayError};
use crate::telegram::{ClientError, ProtocolClient};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

const RESTRICTION_MARKERS: [&str; 4] = ["peer_flood", "user_restricted", "user_banned_in_channel", "restricted"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Restricted(String),
    /// The probe failed for a reason that says nothing about restriction
    Unhealthy(String),
}

#[derive(Debug, Default)]
struct HealthState {
    restricted: Option<String>,
    last_checked: Option<Instant>,
}

/// Restriction reason carried by `err`, if it is a restriction error
pub fn restriction_reason(err: &ClientError) -> Option<String> {
    match err {
        ClientError::Restricted(reason) => Some(reason.clone()),
        ClientError::Rpc { message, .. } => {
            let lower = message.to_lowercase();
            RESTRICTION_MARKERS
                .iter()
                .any(|marker| lower.contains(marker))
                .then(|| message.clone())
        }
        _ => None,
    }
}

pub struct HealthMonitor {
    client: Arc<dyn ProtocolClient>,
    backoff: Arc<BackoffController>,
    control: ControlSignal,
    config: HealthConfig,
    state: Mutex<HealthState>,
}

impl HealthMonitor {
    pub fn new(
        client: Arc<dyn ProtocolClient>,
        backoff: Arc<BackoffController>,
        control: ControlSignal,
        config: HealthConfig,
    ) -> Self {
        Self {
            client,
            backoff,
            control,
            config,
            state: Mutex::new(HealthState::default()),
        }
    }

    pub fn is_restricted(&self) -> bool {
        self.lock_state().restricted.is_some()
    }

    /// Probe the account unless a healthy result is still fresh
    pub async fn check(&self) -> Result<HealthStatus, Shutdown> {
        {
            let state = self.lock_state();
            if state.restricted.is_none() {
                if let Some(last) = state.last_checked {
                    if last.elapsed() < self.config.check_interval {
                        return Ok(HealthStatus::Healthy);
                    }
                }
            }
        }

        log::info!("🩺 Running account health check");
        let text = format!("Health check {}", chrono::Utc::now().to_rfc3339());
        let client = &self.client;
        let peer = self.config.probe_peer.as_str();
        let text = text.as_str();

        let result = self
            .backoff
            .call(Category::SendMessage, peer, move || client.send_message(peer, text))
            .await;

        match result {
            Ok(message_id) => {
                {
                    let mut state = self.lock_state();
                    if state.restricted.take().is_some() {
                        log::info!("✅ Account no longer restricted");
                    }
                    state.last_checked = Some(Instant::now());
                }
                self.delete_probe(message_id).await?;
                Ok(HealthStatus::Healthy)
            }
            Err(GatewayError::Shutdown) => Err(Shutdown),
            Err(GatewayError::Client(err)) => match restriction_reason(&err) {
                Some(reason) => {
                    self.mark_restricted(&reason);
                    Ok(HealthStatus::Restricted(reason))
                }
                None => {
                    log::error!("❌ Health check failed: {}", err);
                    Ok(HealthStatus::Unhealthy(err.to_string()))
                }
            },
            Err(e) => {
                log::error!("❌ Health check failed: {}", e);
                Ok(HealthStatus::Unhealthy(e.to_string()))
            }
        }
    }

    async fn delete_probe(&self, message_id: i64) -> Result<(), Shutdown> {
        let client = &self.client;
        let peer = self.config.probe_peer.as_str();
        let result = self
            .backoff
            .call(Category::Default, peer, move || client.delete_message(peer, message_id))
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(GatewayError::Shutdown) => Err(Shutdown),
            Err(e) => {
                log::warn!("⚠️  Could not delete health check message {}: {}", message_id, e);
                Ok(())
            }
        }
    }

    fn mark_restricted(&self, reason: &str) {
        let newly = {
            let mut state = self.lock_state();
            let newly = state.restricted.is_none();
            state.restricted = Some(reason.to_string());
            state.last_checked = Some(Instant::now());
            newly
        };

        if newly {
            log::error!("🚨 ACCOUNT RESTRICTED: {}", reason);
            log::error!("🚨 Pausing all platform operations until resumed");
        }
        self.control.pause();
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, HealthState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fast_backoff, ScriptedClient};
    use std::time::Duration;

    fn monitor(client: Arc<ScriptedClient>) -> (HealthMonitor, ControlSignal) {
        let control = ControlSignal::new();
        let config = HealthConfig {
            check_interval: Duration::from_secs(3_600),
            probe_peer: "me".to_string(),
        };
        (HealthMonitor::new(client, fast_backoff(&control), control.clone(), config), control)
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_result_is_reused_within_interval() {
        let client = ScriptedClient::new();
        let (monitor, _) = monitor(client.clone());

        assert_eq!(monitor.check().await.unwrap(), HealthStatus::Healthy);
        assert_eq!(monitor.check().await.unwrap(), HealthStatus::Healthy);
        assert_eq!(client.count("send:me"), 1);
        assert_eq!(client.count("delete:me:1"), 1, "probe message is removed after sending");

        tokio::time::advance(Duration::from_secs(3_601)).await;
        monitor.check().await.unwrap();
        assert_eq!(client.count("send:me"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restriction_pauses_control() {
        let client = ScriptedClient::new();
        client.fail_send(ClientError::Rpc { code: 400, message: "PEER_FLOOD".into() });
        let (monitor, control) = monitor(client.clone());

        let status = monitor.check().await.unwrap();
        assert_eq!(status, HealthStatus::Restricted("PEER_FLOOD".into()));
        assert!(monitor.is_restricted());
        assert!(control.is_paused());

        // Restricted accounts are probed again without waiting for the interval
        control.resume();
        assert_eq!(monitor.check().await.unwrap(), HealthStatus::Healthy);
        assert!(!monitor.is_restricted());
        assert_eq!(client.count("send:me"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_is_unhealthy_but_not_restricted() {
        let client = ScriptedClient::new();
        client.fail_send(ClientError::Transport("connection refused".into()));
        let (monitor, control) = monitor(client);

        let status = monitor.check().await.unwrap();
        assert!(matches!(status, HealthStatus::Unhealthy(_)));
        assert!(!monitor.is_restricted());
        assert!(!control.is_paused());
    }

    #[test]
    fn test_restriction_reason_detection() {
        assert_eq!(
            restriction_reason(&ClientError::Restricted("USER_RESTRICTED".into())),
            Some("USER_RESTRICTED".to_string())
        );
        assert!(restriction_reason(&ClientError::Rpc { code: 400, message: "USER_BANNED_IN_CHANNEL".into() }).is_some());
        assert!(restriction_reason(&ClientError::Rpc { code: 400, message: "CHAT_INVALID".into() }).is_none());
        assert!(restriction_reason(&ClientError::FloodWait { seconds: 5 }).is_none());
    }
}
