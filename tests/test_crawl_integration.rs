//! End-to-end tests: runtime wiring, discovery, crawling and membership
//! sweeps against an in-process fake platform and an on-disk SQLite store

#[cfg(test)]
mod crawl_integration_tests {
    use async_trait::async_trait;
    use groupscout::discovery::{Confidence, DiscoveryStatus};
    use groupscout::gateway::Category;
    use groupscout::store::{MembershipState, SqliteStore, Store};
    use groupscout::telegram::{ClientError, MembershipStatus, ProtocolClient, RawEntity};
    use groupscout::{AppConfig, Runtime};
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::NamedTempFile;

    /// Fake platform: a fixed set of groups, searched by substring
    struct FakePlatform {
        groups: Vec<RawEntity>,
        joined: Mutex<HashSet<String>>,
        kicked: Mutex<HashSet<String>>,
        searches: Mutex<usize>,
    }

    impl FakePlatform {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                groups: vec![
                    RawEntity::group(101, "IELTS Study Club", Some("ielts_study_club")),
                    RawEntity::group(102, "IELTS Speaking Tashkent", Some("ielts_speaking_tashkent")),
                    RawEntity::group(103, "Cooking Club", Some("cooking_uz")),
                    RawEntity::channel(104, "IELTS News", Some("ielts_news")),
                ],
                joined: Mutex::new(HashSet::new()),
                kicked: Mutex::new(HashSet::new()),
                searches: Mutex::new(0),
            })
        }

        fn kick(&self, username: &str) {
            self.joined.lock().unwrap().remove(username);
            self.kicked.lock().unwrap().insert(username.to_string());
        }

        fn searches(&self) -> usize {
            *self.searches.lock().unwrap()
        }
    }

    #[async_trait]
    impl ProtocolClient for FakePlatform {
        async fn search(&self, query: &str, limit: usize) -> Result<Vec<RawEntity>, ClientError> {
            *self.searches.lock().unwrap() += 1;
            let needle: String = query
                .to_lowercase()
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect();
            if needle.len() < 3 {
                return Ok(Vec::new());
            }

            Ok(self
                .groups
                .iter()
                .filter(|g| {
                    let username: String = g.username.clone().unwrap_or_default().replace('_', "");
                    username.contains(&needle)
                })
                .take(limit)
                .cloned()
                .collect())
        }

        async fn resolve(&self, identifier: &str) -> Result<RawEntity, ClientError> {
            self.groups
                .iter()
                .find(|g| g.username.as_deref() == Some(identifier))
                .cloned()
                .ok_or_else(|| ClientError::NotFound(identifier.to_string()))
        }

        async fn join(&self, identifier: &str) -> Result<(), ClientError> {
            self.joined.lock().unwrap().insert(identifier.to_string());
            Ok(())
        }

        async fn check_membership(&self, identifier: &str) -> Result<MembershipStatus, ClientError> {
            if self.kicked.lock().unwrap().contains(identifier) {
                return Ok(MembershipStatus::Left);
            }
            if self.joined.lock().unwrap().contains(identifier) {
                Ok(MembershipStatus::Joined)
            } else {
                Ok(MembershipStatus::Unknown)
            }
        }

        async fn list_joined_groups(&self) -> Result<Vec<RawEntity>, ClientError> {
            let joined = self.joined.lock().unwrap().clone();
            Ok(self
                .groups
                .iter()
                .filter(|g| g.username.as_ref().is_some_and(|u| joined.contains(u)))
                .cloned()
                .collect())
        }

        async fn send_message(&self, _identifier: &str, _text: &str) -> Result<i64, ClientError> {
            Ok(1)
        }

        async fn delete_message(&self, _identifier: &str, _message_id: i64) -> Result<(), ClientError> {
            Ok(())
        }
    }

    fn fast_config(db_path: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.db_path = db_path.to_string();
        for category in Category::ALL {
            config.throttle.intervals.insert(category, Duration::from_millis(5));
        }
        config.membership.per_check_delay = Duration::from_millis(5);
        config.membership.join_delay_min = Duration::from_millis(5);
        config.membership.join_delay_max = Duration::from_millis(10);
        config.crawler.batch_size = 2;
        config.crawler.batch_interval = Duration::from_secs(30);
        config.scheduler.base_keywords = vec!["ielts".to_string()];
        // Keep the scheduler on base keywords only
        config.crawler.evolution_sample = 0;
        config
    }

    fn runtime(platform: Arc<FakePlatform>, db: &NamedTempFile) -> (Runtime, Arc<SqliteStore>) {
        let path = db.path().to_str().unwrap();
        let store = Arc::new(SqliteStore::open(path).unwrap());
        (Runtime::new(fast_config(path), platform, store.clone()), store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_discover_then_serve_from_store_after_reopen() {
        let platform = FakePlatform::new();
        let db = NamedTempFile::new().unwrap();

        {
            let (runtime, store) = runtime(platform.clone(), &db);
            let mut pipeline = runtime.discovery();
            let outcome = pipeline.discover("IELTS Study Club").await.unwrap();

            assert_eq!(outcome.status, DiscoveryStatus::Found);
            assert_eq!(outcome.best.as_ref().unwrap().candidate.entity_id, 101);
            assert!(store.get_entity(101).await.unwrap().is_some());
        }

        let searches = platform.searches();
        let (runtime, _) = runtime(platform.clone(), &db);
        let outcome = runtime.discovery().discover("ielts study club").await.unwrap();

        assert_eq!(outcome.status, DiscoveryStatus::Found);
        assert_eq!(outcome.best.unwrap().confidence, Confidence::Cached);
        assert_eq!(platform.searches(), searches);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_is_never_a_discovery_result_by_default() {
        let platform = FakePlatform::new();
        let db = NamedTempFile::new().unwrap();
        let (runtime, _) = runtime(platform, &db);

        let outcome = runtime.discovery().discover("IELTS News").await.unwrap();
        assert!(outcome.candidates.iter().all(|r| r.candidate.entity_id != 104));
    }

    #[tokio::test(start_paused = true)]
    async fn test_crawl_join_then_sweep_detects_kick() {
        let platform = FakePlatform::new();
        let db = NamedTempFile::new().unwrap();
        let (runtime, store) = runtime(platform.clone(), &db);

        let mut crawler = runtime.crawler();
        let report = crawler.process_keyword("ielts study club").await.unwrap();
        assert!(report.success);
        assert!(report.new_entities.contains(&101));
        assert!(report.joined >= 1);
        assert_eq!(
            store.get_membership(101).await.unwrap().unwrap().state,
            MembershipState::Joined
        );

        platform.kick("ielts_study_club");
        let sweep = runtime.tracker().sweep().await.unwrap();
        assert_eq!(sweep.left, 1);

        let record = store.get_membership(101).await.unwrap().unwrap();
        assert_eq!(record.state, MembershipState::Left);
        assert!(record.left_at.is_some());

        // The dialog list no longer has it, so sync leaves it alone
        runtime.tracker().sync_joined().await.unwrap();
        assert_eq!(
            store.get_membership(101).await.unwrap().unwrap().state,
            MembershipState::Left
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_shutdown_records_search_runs() {
        let platform = FakePlatform::new();
        let db = NamedTempFile::new().unwrap();
        let (runtime, store) = runtime(platform, &db);

        let mut crawler = runtime.crawler();
        let control = runtime.control.clone();
        let handle = tokio::spawn(async move { crawler.run(None).await });

        tokio::time::sleep(Duration::from_secs(45)).await;
        control.shutdown();
        let stats = handle.await.unwrap();

        assert_eq!(stats.iterations, 2);
        assert_eq!(stats.keywords, 4);

        let mut recorded = 0;
        for keyword in runtime.scheduler().base_keywords() {
            if store.last_search_run(keyword).await.unwrap().is_some() {
                recorded += 1;
            }
        }
        assert_eq!(recorded, 4);
    }
}
