//! Scripted protocol client and wiring helpers for unit tests

use crate::config::{BackoffConfig, ThrottleConfig};
use crate::control::ControlSignal;
use crate::gateway::{BackoffController, Category, RequestLimiter};
use crate::telegram::{ClientError, MembershipStatus, ProtocolClient, RawEntity};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct ScriptedClient {
    search: Mutex<HashMap<String, Vec<RawEntity>>>,
    search_errors: Mutex<HashMap<String, VecDeque<ClientError>>>,
    resolve: Mutex<HashMap<String, RawEntity>>,
    join_errors: Mutex<HashMap<String, VecDeque<ClientError>>>,
    statuses: Mutex<HashMap<String, VecDeque<Result<MembershipStatus, ClientError>>>>,
    joined: Mutex<HashSet<String>>,
    dialogs: Mutex<Vec<RawEntity>>,
    send_errors: Mutex<VecDeque<ClientError>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_search(&self, query: &str, results: Vec<RawEntity>) {
        self.search.lock().unwrap().insert(query.to_lowercase(), results);
    }

    /// Queue errors returned by the next searches for `query`
    pub fn fail_search(&self, query: &str, err: ClientError) {
        self.search_errors
            .lock()
            .unwrap()
            .entry(query.to_lowercase())
            .or_default()
            .push_back(err);
    }

    pub fn with_resolve(&self, identifier: &str, raw: RawEntity) {
        self.resolve.lock().unwrap().insert(identifier.to_string(), raw);
    }

    pub fn fail_join(&self, identifier: &str, err: ClientError) {
        self.join_errors
            .lock()
            .unwrap()
            .entry(identifier.to_string())
            .or_default()
            .push_back(err);
    }

    /// Queue membership check results for `identifier`
    pub fn with_status(&self, identifier: &str, status: Result<MembershipStatus, ClientError>) {
        self.statuses
            .lock()
            .unwrap()
            .entry(identifier.to_string())
            .or_default()
            .push_back(status);
    }

    pub fn with_dialogs(&self, dialogs: Vec<RawEntity>) {
        *self.dialogs.lock().unwrap() = dialogs;
    }

    pub fn fail_send(&self, err: ClientError) {
        self.send_errors.lock().unwrap().push_back(err);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ProtocolClient for ScriptedClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<RawEntity>, ClientError> {
        let key = query.to_lowercase();
        self.log(format!("search:{}", key));

        if let Some(err) = self.search_errors.lock().unwrap().get_mut(&key).and_then(|q| q.pop_front()) {
            return Err(err);
        }

        let mut results = self.search.lock().unwrap().get(&key).cloned().unwrap_or_default();
        results.truncate(limit);
        Ok(results)
    }

    async fn resolve(&self, identifier: &str) -> Result<RawEntity, ClientError> {
        self.log(format!("resolve:{}", identifier));
        self.resolve
            .lock()
            .unwrap()
            .get(identifier)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(identifier.to_string()))
    }

    async fn join(&self, identifier: &str) -> Result<(), ClientError> {
        self.log(format!("join:{}", identifier));
        if let Some(err) = self.join_errors.lock().unwrap().get_mut(identifier).and_then(|q| q.pop_front()) {
            return Err(err);
        }
        self.joined.lock().unwrap().insert(identifier.to_string());
        Ok(())
    }

    async fn check_membership(&self, identifier: &str) -> Result<MembershipStatus, ClientError> {
        self.log(format!("check:{}", identifier));
        if let Some(status) = self.statuses.lock().unwrap().get_mut(identifier).and_then(|q| q.pop_front()) {
            return status;
        }
        if self.joined.lock().unwrap().contains(identifier) {
            Ok(MembershipStatus::Joined)
        } else {
            Ok(MembershipStatus::Unknown)
        }
    }

    async fn list_joined_groups(&self) -> Result<Vec<RawEntity>, ClientError> {
        self.log("dialogs".to_string());
        Ok(self.dialogs.lock().unwrap().clone())
    }

    async fn send_message(&self, identifier: &str, _text: &str) -> Result<i64, ClientError> {
        self.log(format!("send:{}", identifier));
        match self.send_errors.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(self.count("send:") as i64),
        }
    }

    async fn delete_message(&self, identifier: &str, message_id: i64) -> Result<(), ClientError> {
        self.log(format!("delete:{}:{}", identifier, message_id));
        Ok(())
    }
}

/// Backoff controller with 10ms category intervals and a fixed seed
pub fn fast_backoff(control: &ControlSignal) -> Arc<BackoffController> {
    let mut throttle = ThrottleConfig::default();
    for category in Category::ALL {
        throttle.intervals.insert(category, Duration::from_millis(10));
    }
    let limiter = Arc::new(RequestLimiter::new(throttle, control.clone()));
    let config = BackoffConfig {
        max_attempts: 2,
        hard_jitter_max: Duration::from_secs(1),
        ambiguous_base: Duration::from_millis(100),
        ambiguous_max: Duration::from_secs(1),
        max_level: 4,
    };
    Arc::new(BackoffController::with_rng(limiter, control.clone(), config, StdRng::seed_from_u64(1)))
}
