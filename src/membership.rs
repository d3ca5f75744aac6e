//! Membership state tracker
//!
//! State machine: `not_joined -> joined -> {left, removed}`.
//!
//! - `joined` is entered only after a join followed by a confirming
//!   membership check, or from the authoritative dialog list sync.
//! - `left` / `removed` are entered only when a membership check says so.
//! - An inconclusive check (unknown status or any error) leaves the state
//!   untouched and only stamps `last_checked_at`.
//!
//! Every record is committed on its own so an interrupted sweep keeps all
//! updates applied before the interruption.

use crate::config::MembershipConfig;
use crate::control::{ControlSignal, Shutdown};
use crate::gateway::{BackoffController, Category, GatewayError};
use crate::store::{unix_now, EntityRecord, Event, MembershipRecord, MembershipState, Store, StoreError};
use crate::telegram::{classify, EntityKind, MembershipStatus, ProtocolClient};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("gateway error: {0}")]
    Gateway(GatewayError),
    #[error("shutdown requested")]
    Shutdown,
}

impl From<GatewayError> for TrackerError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Shutdown => TrackerError::Shutdown,
            other => TrackerError::Gateway(other),
        }
    }
}

impl From<Shutdown> for TrackerError {
    fn from(_: Shutdown) -> Self {
        TrackerError::Shutdown
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    AlreadyJoined,
    /// Join call succeeded but the follow-up check did not confirm it
    Unconfirmed,
    /// Previously removed from this group, not retried
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub verified: usize,
    pub left: usize,
    pub removed: usize,
    pub inconclusive: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub seen: usize,
    pub newly_joined: usize,
}

/// Apply one membership check result to a record
///
/// `None` stands for a failed check. Returns the updated record and the
/// event to store with it, if the state changed.
pub fn apply_status(
    record: &MembershipRecord,
    status: Option<MembershipStatus>,
    now: i64,
) -> (MembershipRecord, Option<Event>) {
    let mut updated = record.clone();
    updated.last_checked_at = now;

    let (new_state, reason) = match status {
        Some(MembershipStatus::Left) => (MembershipState::Left, "left"),
        Some(MembershipStatus::Banned) => (MembershipState::Removed, "banned"),
        Some(MembershipStatus::Joined) | Some(MembershipStatus::Unknown) | None => return (updated, None),
    };

    if record.state == new_state {
        return (updated, None);
    }

    updated.state = new_state;
    updated.left_at = Some(now);
    let event = Event::MembershipLost {
        reason: reason.to_string(),
        old_state: record.state,
    };
    (updated, Some(event))
}

pub struct MembershipTracker {
    client: Arc<dyn ProtocolClient>,
    backoff: Arc<BackoffController>,
    store: Arc<dyn Store>,
    control: ControlSignal,
    config: MembershipConfig,
    rng: Mutex<StdRng>,
}

impl MembershipTracker {
    pub fn new(
        client: Arc<dyn ProtocolClient>,
        backoff: Arc<BackoffController>,
        store: Arc<dyn Store>,
        control: ControlSignal,
        config: MembershipConfig,
    ) -> Self {
        Self {
            client,
            backoff,
            store,
            control,
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Join `entity` and confirm with a membership check
    pub async fn join(&self, entity: &EntityRecord, source: &str) -> Result<JoinOutcome, TrackerError> {
        let now = unix_now();
        let current = self
            .store
            .get_membership(entity.entity_id)
            .await?
            .unwrap_or_else(|| MembershipRecord::not_joined(entity.entity_id, now));

        match current.state {
            MembershipState::Joined => return Ok(JoinOutcome::AlreadyJoined),
            MembershipState::Removed => {
                log::debug!("   ├─ Not rejoining {} (removed)", entity.entity_id);
                return Ok(JoinOutcome::Skipped);
            }
            MembershipState::NotJoined | MembershipState::Left => {}
        }

        let identifier = entity.to_candidate().identifier();
        self.control.sleep(self.join_delay()).await?;

        let client = &self.client;
        let target = identifier.as_str();
        if let Err(e) = self
            .backoff
            .call(Category::Join, target, move || client.join(target))
            .await
        {
            if e.is_shutdown() {
                return Err(TrackerError::Shutdown);
            }
            log::warn!("❌ Join failed for {}: {}", identifier, e);
            let event = Event::JoinFailed { error: e.to_string() };
            self.store.record_event(Some(entity.entity_id), &event, unix_now()).await?;
            return Ok(JoinOutcome::Failed(e.to_string()));
        }

        let status = self
            .backoff
            .call(Category::MembershipCheck, target, move || client.check_membership(target))
            .await;

        let now = unix_now();
        match status {
            Ok(MembershipStatus::Joined) => {
                let record = MembershipRecord {
                    entity_id: entity.entity_id,
                    state: MembershipState::Joined,
                    joined_at: Some(now),
                    left_at: None,
                    last_checked_at: now,
                };
                let event = Event::Joined { source: source.to_string() };
                self.store.save_membership(&record, Some(&event), now).await?;
                log::info!("✅ Joined {}", identifier);
                Ok(JoinOutcome::Joined)
            }
            Err(GatewayError::Shutdown) => Err(TrackerError::Shutdown),
            other => {
                log::warn!("⚠️  Join of {} not confirmed ({:?}), state unchanged", identifier, other);
                let mut record = current;
                record.last_checked_at = now;
                self.store.save_membership(&record, None, now).await?;
                Ok(JoinOutcome::Unconfirmed)
            }
        }
    }

    /// Mark every group in the live dialog list as joined
    pub async fn sync_joined(&self) -> Result<SyncReport, TrackerError> {
        let client = &self.client;
        let dialogs = self
            .backoff
            .call(Category::ListDialogs, "dialogs", move || client.list_joined_groups())
            .await?;

        let mut report = SyncReport::default();
        for raw in &dialogs {
            let candidate = classify(raw);
            if !matches!(candidate.kind, EntityKind::Group | EntityKind::Channel) {
                continue;
            }
            report.seen += 1;

            let now = unix_now();
            self.store.upsert_entity(&candidate, now).await?;
            let existing = self.store.get_membership(candidate.entity_id).await?;
            if matches!(&existing, Some(r) if r.state == MembershipState::Joined) {
                continue;
            }

            let record = MembershipRecord {
                entity_id: candidate.entity_id,
                state: MembershipState::Joined,
                joined_at: existing.and_then(|r| r.joined_at).or(Some(now)),
                left_at: None,
                last_checked_at: now,
            };
            self.store.save_membership(&record, Some(&Event::MembershipSynced), now).await?;
            report.newly_joined += 1;
        }

        log::info!(
            "🔄 Membership sync: {} groups in dialogs, {} newly marked joined",
            report.seen,
            report.newly_joined
        );
        Ok(report)
    }

    /// Re-check every locally joined record against the platform
    pub async fn sweep(&self) -> Result<SweepReport, TrackerError> {
        let snapshot = self.store.list_memberships(MembershipState::Joined).await?;
        let mut seen = HashSet::new();
        let records: Vec<MembershipRecord> = snapshot.into_iter().filter(|r| seen.insert(r.entity_id)).collect();

        let mut report = SweepReport::default();
        if records.is_empty() {
            log::info!("📭 No joined groups to check");
            return Ok(report);
        }
        log::info!("🔍 Checking membership of {} joined groups", records.len());

        for (index, record) in records.iter().enumerate() {
            if index > 0 {
                self.control.sleep(self.config.per_check_delay).await?;
            }

            let entity = match self.store.get_entity(record.entity_id).await? {
                Some(entity) => entity,
                None => {
                    log::warn!("⚠️  Membership {} has no entity row, skipping", record.entity_id);
                    continue;
                }
            };
            let identifier = entity.to_candidate().identifier();
            let target = identifier.as_str();
            let client = &self.client;

            let status = match self
                .backoff
                .call(Category::MembershipCheck, target, move || client.check_membership(target))
                .await
            {
                Ok(status) => Some(status),
                Err(GatewayError::Shutdown) => return Err(TrackerError::Shutdown),
                Err(e) => {
                    log::warn!("⚠️  Could not check {}: {}", identifier, e);
                    None
                }
            };

            let now = unix_now();
            let (updated, event) = apply_status(record, status, now);
            self.store.save_membership(&updated, event.as_ref(), now).await?;

            report.checked += 1;
            match (status, updated.state) {
                (_, MembershipState::Left) => {
                    log::warn!("🚪 {} is now LEFT", identifier);
                    report.left += 1;
                }
                (_, MembershipState::Removed) => {
                    log::warn!("⛔ {} is now REMOVED", identifier);
                    report.removed += 1;
                }
                (Some(MembershipStatus::Joined), _) => report.verified += 1,
                _ => {
                    log::warn!("⚠️  Membership of {} inconclusive, state unchanged", identifier);
                    report.inconclusive += 1;
                }
            }
        }

        log::info!(
            "✅ Sweep done: {} checked, {} verified, {} left, {} removed, {} inconclusive",
            report.checked,
            report.verified,
            report.left,
            report.removed,
            report.inconclusive
        );
        Ok(report)
    }

    /// Sweep once, or forever with `cycle_interval` between sweeps
    ///
    /// Returns `Ok(())` on shutdown. Other sweep errors are logged and the
    /// loop continues with the next cycle.
    pub async fn run(&self, once: bool) -> Result<(), TrackerError> {
        log::info!("👀 Membership tracker started (once={})", once);
        loop {
            match self.sweep().await {
                Ok(_) => {}
                Err(TrackerError::Shutdown) => return Ok(()),
                Err(e) => log::error!("❌ Membership sweep failed: {}", e),
            }

            if once {
                return Ok(());
            }

            log::info!(
                "💤 Next membership sweep in {}s",
                self.config.cycle_interval.as_secs()
            );
            if self.control.sleep(self.config.cycle_interval).await.is_err() {
                return Ok(());
            }
        }
    }

    fn join_delay(&self) -> Duration {
        let min = self.config.join_delay_min.as_millis() as u64;
        let max = (self.config.join_delay_max.as_millis() as u64).max(min);
        let millis = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .gen_range(min..=max);
        Duration::from_millis(millis)
    }
}
