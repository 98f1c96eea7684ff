//! SQLite-backed store

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use super::{ActivityStamp, AdaptationStore};
use crate::embeddings::{blob_to_embedding, embedding_to_blob};
use crate::error::EngineResult;
use crate::ledger::{InterventionOutcome, InterventionRecord, InterventionSource};
use crate::types::{ErrorEvent, ErrorType, Modality, Tier};

/// SQLite store for error events and the intervention ledger
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database at the given path
    pub async fn new<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> EngineResult<()> {
        conn.execute_batch(r#"
            -- Detected mistakes, append-only
            CREATE TABLE IF NOT EXISTS error_events (
                id TEXT PRIMARY KEY,
                learner_id TEXT NOT NULL,
                error_type TEXT NOT NULL,
                category TEXT,
                context TEXT NOT NULL,
                correction TEXT,
                modality TEXT NOT NULL,
                embedding BLOB,
                created_at TEXT NOT NULL
            );

            -- Intervention ledger; outcome columns filled in once
            CREATE TABLE IF NOT EXISTS adaptation_interventions (
                id TEXT PRIMARY KEY,
                learner_id TEXT NOT NULL,
                pattern_key TEXT NOT NULL,
                error_type TEXT NOT NULL,
                category TEXT,
                tier INTEGER NOT NULL,
                source TEXT NOT NULL,
                frequency_at_intervention INTEGER NOT NULL,
                frequency_after_window INTEGER,
                measured_at TEXT,
                is_resolved INTEGER,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_error_events_learner ON error_events(learner_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_interventions_learner ON adaptation_interventions(learner_id, created_at DESC);
        "#)?;

        Ok(())
    }

    fn parse_time(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .ok()
    }

    fn event_from_row(row: EventRow) -> Option<ErrorEvent> {
        let error_type = match ErrorType::parse(&row.error_type) {
            Some(t) => t,
            None => {
                warn!("Skipping error event {}: unknown error type '{}'", row.id, row.error_type);
                return None;
            }
        };
        let modality = match Modality::parse(&row.modality) {
            Some(m) => m,
            None => {
                warn!("Skipping error event {}: unknown modality '{}'", row.id, row.modality);
                return None;
            }
        };
        let created_at = match Self::parse_time(&row.created_at) {
            Some(t) => t,
            None => {
                warn!("Skipping error event {}: bad timestamp '{}'", row.id, row.created_at);
                return None;
            }
        };
        let embedding = match row.embedding {
            Some(blob) => {
                let parsed = blob_to_embedding(&blob);
                if parsed.is_none() {
                    warn!("Ignoring malformed embedding on error event {}", row.id);
                }
                parsed
            }
            None => None,
        };

        Some(ErrorEvent {
            id: row.id,
            learner_id: row.learner_id,
            error_type,
            category: row.category,
            context: row.context,
            correction: row.correction,
            modality,
            embedding,
            created_at,
        })
    }

    fn intervention_from_row(row: InterventionRow) -> Option<InterventionRecord> {
        let error_type = ErrorType::parse(&row.error_type);
        let tier = Tier::from_level(row.tier);
        let source = InterventionSource::parse(&row.source);
        let created_at = Self::parse_time(&row.created_at);
        let frequency_at_intervention = u8::try_from(row.frequency_at_intervention).ok();

        let (Some(error_type), Some(tier), Some(source), Some(created_at), Some(frequency_at_intervention)) =
            (error_type, tier, source, created_at, frequency_at_intervention)
        else {
            warn!("Skipping malformed intervention row {}", row.id);
            return None;
        };

        Some(InterventionRecord {
            id: row.id,
            learner_id: row.learner_id,
            pattern_key: row.pattern_key,
            error_type,
            category: row.category,
            tier,
            source,
            frequency_at_intervention,
            frequency_after_window: row.frequency_after_window.and_then(|f| u8::try_from(f).ok()),
            measured_at: row.measured_at.as_deref().and_then(Self::parse_time),
            is_resolved: row.is_resolved.map(|v| v != 0),
            created_at,
        })
    }

    /// Number of stored events for a learner
    pub async fn event_count(&self, learner_id: &str) -> EngineResult<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM error_events WHERE learner_id = ?1",
            params![learner_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Insert many events in one transaction
    pub async fn insert_events(&self, events: &[ErrorEvent]) -> EngineResult<usize> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(INSERT_EVENT)?;
            for event in events {
                inserted += execute_insert(&mut stmt, event)?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch(sql)?;
        Ok(())
    }
}

/// Fixed-width UTC timestamps so text ordering matches time ordering
fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

const INSERT_EVENT: &str = r#"INSERT OR IGNORE INTO error_events
    (id, learner_id, error_type, category, context, correction, modality, embedding, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#;

fn execute_insert(stmt: &mut rusqlite::CachedStatement<'_>, event: &ErrorEvent) -> rusqlite::Result<usize> {
    stmt.execute(params![
        event.id,
        event.learner_id,
        event.error_type.as_str(),
        event.category,
        event.context,
        event.correction,
        event.modality.as_str(),
        event.embedding.as_deref().map(embedding_to_blob),
        format_time(event.created_at),
    ])
}

/// Raw error_events row before validation
struct EventRow {
    id: String,
    learner_id: String,
    error_type: String,
    category: Option<String>,
    context: String,
    correction: Option<String>,
    modality: String,
    embedding: Option<Vec<u8>>,
    created_at: String,
}

/// Raw adaptation_interventions row before validation
struct InterventionRow {
    id: String,
    learner_id: String,
    pattern_key: String,
    error_type: String,
    category: Option<String>,
    tier: i64,
    source: String,
    frequency_at_intervention: i64,
    frequency_after_window: Option<i64>,
    measured_at: Option<String>,
    is_resolved: Option<i64>,
    created_at: String,
}

#[async_trait]
impl AdaptationStore for SqliteStore {
    async fn insert_event(&self, event: &ErrorEvent) -> EngineResult<()> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(INSERT_EVENT)?;
        execute_insert(&mut stmt, event)?;
        Ok(())
    }

    async fn events_for_learner(&self, learner_id: &str) -> EngineResult<Vec<ErrorEvent>> {
        let conn = self.conn.lock().await;

        let mut stmt = conn.prepare_cached(
            r#"SELECT id, learner_id, error_type, category, context, correction, modality, embedding, created_at
               FROM error_events
               WHERE learner_id = ?1
               ORDER BY created_at ASC"#
        )?;

        let rows = stmt.query_map(params![learner_id], |row| {
            Ok(EventRow {
                id: row.get(0)?,
                learner_id: row.get(1)?,
                error_type: row.get(2)?,
                category: row.get(3)?,
                context: row.get(4)?,
                correction: row.get(5)?,
                modality: row.get(6)?,
                embedding: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?.collect::<Result<Vec<_>, _>>()?;

        Ok(rows.into_iter().filter_map(Self::event_from_row).collect())
    }

    async fn append_intervention(&self, record: &InterventionRecord) -> EngineResult<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            r#"INSERT INTO adaptation_interventions
               (id, learner_id, pattern_key, error_type, category, tier, source,
                frequency_at_intervention, frequency_after_window, measured_at, is_resolved, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
            params![
                record.id,
                record.learner_id,
                record.pattern_key,
                record.error_type.as_str(),
                record.category,
                record.tier.level(),
                record.source.as_str(),
                record.frequency_at_intervention,
                record.frequency_after_window,
                record.measured_at.map(format_time),
                record.is_resolved,
                format_time(record.created_at),
            ]
        )?;

        Ok(())
    }

    async fn interventions_for_learner(&self, learner_id: &str) -> EngineResult<Vec<InterventionRecord>> {
        let conn = self.conn.lock().await;

        let mut stmt = conn.prepare_cached(
            r#"SELECT id, learner_id, pattern_key, error_type, category, tier, source,
                      frequency_at_intervention, frequency_after_window, measured_at, is_resolved, created_at
               FROM adaptation_interventions
               WHERE learner_id = ?1
               ORDER BY created_at DESC"#
        )?;

        let rows = stmt.query_map(params![learner_id], |row| {
            Ok(InterventionRow {
                id: row.get(0)?,
                learner_id: row.get(1)?,
                pattern_key: row.get(2)?,
                error_type: row.get(3)?,
                category: row.get(4)?,
                tier: row.get(5)?,
                source: row.get(6)?,
                frequency_at_intervention: row.get(7)?,
                frequency_after_window: row.get(8)?,
                measured_at: row.get(9)?,
                is_resolved: row.get(10)?,
                created_at: row.get(11)?,
            })
        })?.collect::<Result<Vec<_>, _>>()?;

        Ok(rows.into_iter().filter_map(Self::intervention_from_row).collect())
    }

    async fn close_out_intervention(&self, id: &str, outcome: &InterventionOutcome) -> EngineResult<bool> {
        let conn = self.conn.lock().await;

        let changed = conn.execute(
            r#"UPDATE adaptation_interventions
               SET frequency_after_window = ?2, measured_at = ?3, is_resolved = ?4
               WHERE id = ?1 AND measured_at IS NULL"#,
            params![
                id,
                outcome.frequency_after_window,
                format_time(outcome.measured_at),
                outcome.is_resolved,
            ]
        )?;

        Ok(changed > 0)
    }

    async fn latest_activity(&self, learner_id: &str) -> EngineResult<ActivityStamp> {
        let conn = self.conn.lock().await;

        let last_event: Option<String> = conn.query_row(
            "SELECT MAX(created_at) FROM error_events WHERE learner_id = ?1",
            params![learner_id],
            |row| row.get(0),
        )?;

        let (last_intervention, last_measured): (Option<String>, Option<String>) = conn.query_row(
            "SELECT MAX(created_at), MAX(measured_at) FROM adaptation_interventions WHERE learner_id = ?1",
            params![learner_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(ActivityStamp {
            last_event_at: last_event.as_deref().and_then(Self::parse_time),
            last_intervention_at: last_intervention.as_deref().and_then(Self::parse_time),
            last_measured_at: last_measured.as_deref().and_then(Self::parse_time),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    async fn store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("test.db")).await.unwrap();
        (dir, store)
    }

    fn event(learner: &str) -> ErrorEvent {
        ErrorEvent::new(learner, ErrorType::Grammar, Some("verb_conjugation"), "eu merge", Some("eu merg"), Modality::Speech)
    }

    #[tokio::test]
    async fn test_events_round_trip_oldest_first() {
        let (_dir, store) = store().await;
        let now = Utc::now();
        let mut newer = event("u1").at(now);
        newer.embedding = Some(vec![0.25, -0.5, 1.0]);
        store.insert_event(&newer).await.unwrap();
        store.insert_event(&event("u1").at(now - Duration::days(2))).await.unwrap();
        store.insert_event(&event("u2")).await.unwrap();

        let events = store.events_for_learner("u1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].created_at < events[1].created_at);
        assert_eq!(events[1].embedding, Some(vec![0.25, -0.5, 1.0]));
        assert_eq!(events[1].correction.as_deref(), Some("eu merg"));
        assert_eq!(events[1].modality, Modality::Speech);
    }

    #[tokio::test]
    async fn test_malformed_rows_are_skipped() {
        let (_dir, store) = store().await;
        store.insert_event(&event("u1")).await.unwrap();
        store.execute_raw(
            "INSERT INTO error_events (id, learner_id, error_type, context, modality, created_at)
             VALUES ('bad-type', 'u1', 'spelling', 'x', 'text', '2024-01-01T00:00:00Z');
             INSERT INTO error_events (id, learner_id, error_type, context, modality, created_at)
             VALUES ('bad-time', 'u1', 'grammar', 'x', 'text', 'yesterday');
             INSERT INTO error_events (id, learner_id, error_type, context, modality, embedding, created_at)
             VALUES ('bad-blob', 'u1', 'grammar', 'x', 'text', X'010203', '2024-01-01T00:00:00Z');
             INSERT INTO adaptation_interventions
                (id, learner_id, pattern_key, error_type, tier, source, frequency_at_intervention, created_at)
             VALUES ('bad-tier', 'u1', 'grammar|x', 'grammar', 9, 'tutor_prompt', 50, '2024-01-01T00:00:00Z');"
        ).await.unwrap();

        let events = store.events_for_learner("u1").await.unwrap();
        assert_eq!(events.len(), 2);
        let blob_event = events.iter().find(|e| e.id == "bad-blob").unwrap();
        assert!(blob_event.embedding.is_none());

        assert!(store.interventions_for_learner("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_out_happens_once() {
        let (_dir, store) = store().await;
        let now = Utc::now();
        let record = InterventionRecord::new(
            "u1",
            "grammar|verb_conjugation",
            ErrorType::Grammar,
            "verb_conjugation",
            Tier::Push,
            InterventionSource::WorkshopSelection,
            75,
            now - Duration::days(4),
        );
        store.append_intervention(&record).await.unwrap();

        let first = InterventionOutcome { frequency_after_window: 60, is_resolved: false, measured_at: now };
        let second = InterventionOutcome { frequency_after_window: 10, is_resolved: true, measured_at: now };
        assert!(store.close_out_intervention(&record.id, &first).await.unwrap());
        assert!(!store.close_out_intervention(&record.id, &second).await.unwrap());

        let rows = store.interventions_for_learner("u1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].frequency_after_window, Some(60));
        assert_eq!(rows[0].is_resolved, Some(false));
        assert_eq!(rows[0].tier, Tier::Push);
        assert_eq!(rows[0].source, InterventionSource::WorkshopSelection);
    }

    #[tokio::test]
    async fn test_latest_activity() {
        let (_dir, store) = store().await;
        assert_eq!(store.latest_activity("u1").await.unwrap(), ActivityStamp::default());

        store.insert_event(&event("u1")).await.unwrap();
        let stamp = store.latest_activity("u1").await.unwrap();
        assert!(stamp.last_event_at.is_some());
        assert!(stamp.last_intervention_at.is_none());
    }

    #[tokio::test]
    async fn test_bulk_insert_ignores_duplicates() {
        let (_dir, store) = store().await;
        let e = event("u1");
        let n = store.insert_events(&[e.clone(), e, event("u1")]).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(store.event_count("u1").await.unwrap(), 2);
    }
}
