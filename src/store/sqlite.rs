//! SQLite implementation of `Store`
//!
//! A single connection behind a mutex. The schema lives in `/sql/*.sql`, is
//! embedded at compile time and applied on every open (all statements use
//! `IF NOT EXISTS`).
//!
//! ## Usage
//!
//! ```rust,ignore
//! let store = SqliteStore::open("groupscout.db")?;
//! let created = store.upsert_entity(&candidate, unix_now()).await?;
//! ```

use super::models::*;
use super::{Store, StoreError};
use crate::discovery::normalize::normalize_title;
use crate::telegram::{Candidate, EntityKind};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use std::sync::{Arc, Mutex, MutexGuard};

const MIGRATIONS: [(&str, &str); 5] = [
    ("01_entities.sql", include_str!("../../sql/01_entities.sql")),
    ("02_memberships.sql", include_str!("../../sql/02_memberships.sql")),
    ("03_search_runs.sql", include_str!("../../sql/03_search_runs.sql")),
    ("04_keyword_usage.sql", include_str!("../../sql/04_keyword_usage.sql")),
    ("05_events.sql", include_str!("../../sql/05_events.sql")),
];

const ENTITY_COLUMNS: &str =
    "entity_id, username, title, title_norm, kind, about, discovered_at, last_seen_at";
const MEMBERSHIP_COLUMNS: &str = "entity_id, state, joined_at, left_at, last_checked_at";

/// Apply the embedded schema. Idempotent.
pub fn run_schema_migrations(conn: &Connection) -> Result<(), StoreError> {
    log::debug!("🔧 Running schema migrations");
    for (name, sql) in MIGRATIONS {
        conn.execute_batch(sql)?;
        log::debug!("   ├─ ✅ {}", name);
    }
    Ok(())
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` in WAL mode
    pub fn open(db_path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        run_schema_migrations(&conn)?;
        log::info!("📊 Opened SQLite store at {}", db_path);
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        run_schema_migrations(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn query_entity<P: ToSql>(&self, clause: &str, param: P) -> Result<Option<EntityRecord>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM entities WHERE {} ORDER BY discovered_at ASC LIMIT 1",
            ENTITY_COLUMNS, clause
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let row = stmt.query_row(params![param], read_entity_row).optional()?;
        row.transpose()
    }
}

fn corrupt<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

fn read_entity_row(row: &Row<'_>) -> rusqlite::Result<Result<EntityRecord, StoreError>> {
    let entity_id: i64 = row.get(0)?;
    let username: Option<String> = row.get(1)?;
    let title: Option<String> = row.get(2)?;
    let title_norm: String = row.get(3)?;
    let kind: String = row.get(4)?;
    let about: Option<String> = row.get(5)?;
    let discovered_at: i64 = row.get(6)?;
    let last_seen_at: i64 = row.get(7)?;

    Ok(kind.parse::<EntityKind>().map_err(corrupt).map(|kind| EntityRecord {
        entity_id,
        username,
        title,
        title_norm,
        kind,
        about,
        discovered_at,
        last_seen_at,
    }))
}

fn read_membership_row(row: &Row<'_>) -> rusqlite::Result<Result<MembershipRecord, StoreError>> {
    let entity_id: i64 = row.get(0)?;
    let state: String = row.get(1)?;
    let joined_at: Option<i64> = row.get(2)?;
    let left_at: Option<i64> = row.get(3)?;
    let last_checked_at: i64 = row.get(4)?;

    Ok(state.parse::<MembershipState>().map_err(corrupt).map(|state| MembershipRecord {
        entity_id,
        state,
        joined_at,
        left_at,
        last_checked_at,
    }))
}

fn read_search_run_row(row: &Row<'_>) -> rusqlite::Result<SearchRunRecord> {
    Ok(SearchRunRecord {
        keyword: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        results_count: row.get(3)?,
        new_results_count: row.get(4)?,
        success: row.get(5)?,
        error: row.get(6)?,
    })
}

fn insert_event(conn: &Connection, entity_id: Option<i64>, event: &Event, now: i64) -> Result<(), StoreError> {
    let payload = serde_json::to_string(event)?;
    conn.execute(
        "INSERT INTO events (entity_id, event_type, payload, created_at) VALUES (?, ?, ?, ?)",
        params![entity_id, event.kind(), payload, now],
    )?;
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_entity(&self, candidate: &Candidate, now: i64) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let title_norm = candidate.title.as_deref().map(normalize_title).unwrap_or_default();

        let existed = conn
            .prepare_cached("SELECT 1 FROM entities WHERE entity_id = ?")?
            .exists(params![candidate.entity_id])?;

        conn.execute(
            r#"
            INSERT INTO entities (
                entity_id, username, title, title_norm, kind, about, discovered_at, last_seen_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(entity_id) DO UPDATE SET
                username = COALESCE(excluded.username, entities.username),
                title = COALESCE(excluded.title, entities.title),
                title_norm = CASE WHEN excluded.title IS NULL THEN entities.title_norm ELSE excluded.title_norm END,
                kind = excluded.kind,
                about = COALESCE(excluded.about, entities.about),
                last_seen_at = excluded.last_seen_at
            "#,
            params![
                candidate.entity_id,
                candidate.username,
                candidate.title,
                title_norm,
                candidate.kind.as_str(),
                candidate.about,
                now,
                now,
            ],
        )?;

        Ok(!existed)
    }

    async fn get_entity(&self, entity_id: i64) -> Result<Option<EntityRecord>, StoreError> {
        self.query_entity("entity_id = ?", entity_id)
    }

    async fn find_entity_by_username(&self, username: &str) -> Result<Option<EntityRecord>, StoreError> {
        self.query_entity("username = ?", username)
    }

    async fn find_entity_by_title(&self, title_norm: &str) -> Result<Option<EntityRecord>, StoreError> {
        if title_norm.is_empty() {
            return Ok(None);
        }
        self.query_entity("title_norm = ?", title_norm)
    }

    async fn recent_entities(&self, limit: usize) -> Result<Vec<EntityRecord>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM entities ORDER BY discovered_at DESC, rowid DESC LIMIT ?",
            ENTITY_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![limit as i64], read_entity_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    async fn ensure_membership(&self, entity_id: i64, now: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO memberships (entity_id, state, last_checked_at) VALUES (?, ?, ?)",
            params![entity_id, MembershipState::NotJoined.as_str(), now],
        )?;
        Ok(())
    }

    async fn get_membership(&self, entity_id: i64) -> Result<Option<MembershipRecord>, StoreError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM memberships WHERE entity_id = ?", MEMBERSHIP_COLUMNS);
        let mut stmt = conn.prepare_cached(&sql)?;
        let row = stmt.query_row(params![entity_id], read_membership_row).optional()?;
        row.transpose()
    }

    async fn save_membership(
        &self,
        record: &MembershipRecord,
        event: Option<&Event>,
        now: i64,
    ) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO memberships (entity_id, state, joined_at, left_at, last_checked_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(entity_id) DO UPDATE SET
                state = excluded.state,
                joined_at = excluded.joined_at,
                left_at = excluded.left_at,
                last_checked_at = excluded.last_checked_at
            "#,
            params![
                record.entity_id,
                record.state.as_str(),
                record.joined_at,
                record.left_at,
                record.last_checked_at,
            ],
        )?;

        if let Some(event) = event {
            insert_event(&tx, Some(record.entity_id), event, now)?;
        }

        tx.commit()?;
        Ok(())
    }

    async fn list_memberships(&self, state: MembershipState) -> Result<Vec<MembershipRecord>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM memberships WHERE state = ? ORDER BY entity_id",
            MEMBERSHIP_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![state.as_str()], read_membership_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    async fn record_event(&self, entity_id: Option<i64>, event: &Event, now: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        insert_event(&conn, entity_id, event, now)
    }

    async fn events_for(&self, entity_id: i64) -> Result<Vec<StoredEvent>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, entity_id, payload, created_at FROM events WHERE entity_id = ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![entity_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, entity_id, payload, created_at) = row?;
            out.push(StoredEvent {
                id,
                entity_id,
                event: serde_json::from_str(&payload)?,
                created_at,
            });
        }
        Ok(out)
    }

    async fn record_search_run(&self, run: &SearchRunRecord) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO search_runs (
                keyword, started_at, finished_at, results_count, new_results_count, success, error
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                run.keyword,
                run.started_at,
                run.finished_at,
                run.results_count,
                run.new_results_count,
                run.success,
                run.error,
            ],
        )?;
        Ok(())
    }

    async fn last_search_run(&self, keyword: &str) -> Result<Option<SearchRunRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT keyword, started_at, finished_at, results_count, new_results_count, success, error
            FROM search_runs WHERE keyword = ?
            ORDER BY started_at DESC, id DESC LIMIT 1
            "#,
        )?;
        Ok(stmt.query_row(params![keyword], read_search_run_row).optional()?)
    }

    async fn record_keyword_usage(&self, keyword: &str, now: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO keyword_usage (keyword, last_used_at, use_count) VALUES (?, ?, 1)
            ON CONFLICT(keyword) DO UPDATE SET
                last_used_at = excluded.last_used_at,
                use_count = keyword_usage.use_count + 1
            "#,
            params![keyword, now],
        )?;
        Ok(())
    }

    async fn keyword_usage(&self, keyword: &str) -> Result<Option<KeywordRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare_cached("SELECT keyword, last_used_at, use_count FROM keyword_usage WHERE keyword = ?")?;
        let record = stmt
            .query_row(params![keyword], |row| {
                Ok(KeywordRecord {
                    keyword: row.get(0)?,
                    last_used_at: row.get(1)?,
                    use_count: row.get(2)?,
                })
            })
            .optional()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn candidate(id: i64, title: &str, username: Option<&str>) -> Candidate {
        Candidate {
            entity_id: id,
            title: Some(title.to_string()),
            username: username.map(str::to_string),
            kind: EntityKind::Group,
            about: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_entity_reports_creation_and_refreshes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let c = candidate(100, "IELTS Study Club!", Some("ielts_club"));

        assert!(store.upsert_entity(&c, 1_000).await.unwrap());
        assert!(!store.upsert_entity(&c, 2_000).await.unwrap());

        let record = store.get_entity(100).await.unwrap().unwrap();
        assert_eq!(record.title_norm, "ielts study club");
        assert_eq!(record.discovered_at, 1_000);
        assert_eq!(record.last_seen_at, 2_000);
        assert_eq!(record.kind, EntityKind::Group);

        let by_user = store.find_entity_by_username("ielts_club").await.unwrap().unwrap();
        assert_eq!(by_user.entity_id, 100);
        let by_title = store.find_entity_by_title("ielts study club").await.unwrap().unwrap();
        assert_eq!(by_title.entity_id, 100);
        assert!(store.find_entity_by_title("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recent_entities_newest_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_entity(&candidate(1, "A", None), 10).await.unwrap();
        store.upsert_entity(&candidate(2, "B", None), 30).await.unwrap();
        store.upsert_entity(&candidate(3, "C", None), 20).await.unwrap();

        let ids: Vec<i64> = store
            .recent_entities(2)
            .await
            .unwrap()
            .iter()
            .map(|e| e.entity_id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_membership_lifecycle_with_event() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_entity(&candidate(7, "Club", Some("club_seven")), 1).await.unwrap();
        store.ensure_membership(7, 1).await.unwrap();
        store.ensure_membership(7, 99).await.unwrap();

        let mut record = store.get_membership(7).await.unwrap().unwrap();
        assert_eq!(record.state, MembershipState::NotJoined);
        assert_eq!(record.last_checked_at, 1, "ensure must not overwrite");

        record.state = MembershipState::Joined;
        record.joined_at = Some(5);
        store
            .save_membership(&record, Some(&Event::Joined { source: "auto".to_string() }), 5)
            .await
            .unwrap();

        let joined = store.list_memberships(MembershipState::Joined).await.unwrap();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].joined_at, Some(5));

        let events = store.events_for(7).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, Event::Joined { source: "auto".to_string() });
    }

    #[tokio::test]
    async fn test_search_runs_and_keyword_usage() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.last_search_run("ielts").await.unwrap().is_none());

        for (started, success) in [(10, true), (20, false)] {
            store
                .record_search_run(&SearchRunRecord {
                    keyword: "ielts".to_string(),
                    started_at: started,
                    finished_at: Some(started + 1),
                    results_count: 3,
                    new_results_count: 1,
                    success,
                    error: None,
                })
                .await
                .unwrap();
        }
        let last = store.last_search_run("ielts").await.unwrap().unwrap();
        assert_eq!(last.started_at, 20);
        assert!(!last.success);

        store.record_keyword_usage("ielts", 10).await.unwrap();
        store.record_keyword_usage("ielts", 20).await.unwrap();
        let usage = store.keyword_usage("ielts").await.unwrap().unwrap();
        assert_eq!(usage.use_count, 2);
        assert_eq!(usage.last_used_at, 20);
    }

    #[tokio::test]
    async fn test_on_disk_store_survives_reopen() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();

        {
            let store = SqliteStore::open(db_path).unwrap();
            store.upsert_entity(&candidate(1, "Persisted", Some("persisted")), 1).await.unwrap();
        }

        let reopened = SqliteStore::open(db_path).unwrap();
        assert!(reopened.find_entity_by_username("persisted").await.unwrap().is_some());
    }
}
