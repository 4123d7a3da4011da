//! SQLite-backed persistence for events, personality profiles and autonomy settings

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::store::{EventFilter, EventStore, PersonalityStore};
use crate::twin::autonomy::{AutonomySettings, AutonomySettingsStore};
use crate::twin::facts::{Fact, FactStore};
use crate::error::TwinError;
use crate::types::{clamp_unit, EventType, Impact, LearningEvent, Payload, PersonalityProfile};

/// Column tuple read back from `learning_events`
type EventRow = (String, String, String, String, String, f64, String, String, bool);

pub struct SqliteLearningStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLearningStore {
    /// Open (or create) the database at `path`
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open learning database at {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init_schema(&conn)?;
        debug!("Opened learning database at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS learning_events (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                context TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '{}',
                confidence REAL NOT NULL,
                impact TEXT NOT NULL DEFAULT 'medium',
                timestamp TEXT NOT NULL,
                applied INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS personality_profiles (
                user_id TEXT PRIMARY KEY,
                traits TEXT NOT NULL,
                last_updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS autonomy_settings (
                user_id TEXT PRIMARY KEY,
                settings TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_facts (
                user_id TEXT NOT NULL,
                module TEXT NOT NULL,
                statement TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_facts_statement ON user_facts(user_id, statement COLLATE NOCASE);
            CREATE INDEX IF NOT EXISTS idx_events_user_time ON learning_events(user_id, timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_events_type ON learning_events(event_type);
        "#)?;
        Ok(())
    }

    /// Create a default profile unless one exists
    pub async fn create_profile(&self, user_id: &str) -> Result<()> {
        let profile = PersonalityProfile::with_defaults(user_id);
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO personality_profiles (user_id, traits, last_updated) VALUES (?1, ?2, ?3)",
            params![user_id, serde_json::to_string(&profile.traits)?, timestamp(&profile.last_updated)],
        )?;
        Ok(())
    }

    pub async fn set_autonomy(&self, user_id: &str, settings: &AutonomySettings) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT OR REPLACE INTO autonomy_settings (user_id, settings, updated_at)
               VALUES (?1, ?2, ?3)"#,
            params![user_id, serde_json::to_string(settings)?, timestamp(&Utc::now())],
        )?;
        Ok(())
    }

    pub async fn get_event(&self, event_id: &str) -> Result<Option<LearningEvent>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                r#"SELECT id, user_id, event_type, context, payload, confidence, impact, timestamp, applied
                   FROM learning_events WHERE id = ?1"#,
                params![event_id],
                read_row,
            )
            .optional()?;
        row.map(event_from_row).transpose()
    }

    /// Event counts per type for a user
    pub async fn count_by_type(&self, user_id: &str) -> Result<BTreeMap<String, u64>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT event_type, COUNT(*) FROM learning_events WHERE user_id = ?1 GROUP BY event_type",
        )?;
        let counts = stmt
            .query_map(params![user_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts.into_iter().map(|(t, c)| (t, c.max(0) as u64)).collect())
    }
}

/// Fixed-width RFC 3339 so timestamps compare correctly as text
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp '{}'", raw))?
        .with_timezone(&Utc))
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn event_from_row(row: EventRow) -> Result<LearningEvent> {
    let (id, user_id, event_type, context, payload, confidence, impact, ts, applied) = row;
    let event_type: EventType = event_type
        .parse()
        .map_err(|e: TwinError| TwinError::data_integrity(&id, "event_type", e.to_string()))?;
    let payload: Payload = match serde_json::from_str(&payload) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("{}, using an empty payload", TwinError::data_integrity(&id, "payload", e.to_string()));
            Payload::new()
        }
    };
    let timestamp =
        parse_timestamp(&ts).map_err(|e| TwinError::data_integrity(&id, "timestamp", format!("{:#}", e)))?;
    Ok(LearningEvent {
        id,
        user_id,
        event_type,
        context,
        payload,
        confidence: clamp_unit(confidence),
        impact: Impact::parse_lenient(&impact),
        timestamp,
        applied,
    })
}

#[async_trait::async_trait]
impl EventStore for SqliteLearningStore {
    async fn append(&self, event: &LearningEvent) -> Result<String> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO learning_events
               (id, user_id, event_type, context, payload, confidence, impact, timestamp, applied)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            params![
                event.id,
                event.user_id,
                event.event_type.as_str(),
                event.context,
                serde_json::to_string(&event.payload)?,
                clamp_unit(event.confidence),
                event.impact.as_str(),
                timestamp(&event.timestamp),
                event.applied,
            ],
        )
        .with_context(|| format!("Failed to persist event {}", event.id))?;
        Ok(event.id.clone())
    }

    async fn query(
        &self,
        user_id: &str,
        filter: &EventFilter,
        window: Duration,
        limit: usize,
    ) -> Result<Vec<LearningEvent>> {
        let mut sql = String::from(
            r#"SELECT id, user_id, event_type, context, payload, confidence, impact, timestamp, applied
               FROM learning_events WHERE user_id = ?1 AND timestamp >= ?2"#,
        );
        let mut args = vec![user_id.to_string(), timestamp(&(Utc::now() - window))];

        if let Some(types) = &filter.event_types {
            if types.is_empty() {
                return Ok(Vec::new());
            }
            let start = args.len() + 1;
            let placeholders: Vec<String> = (start..start + types.len()).map(|i| format!("?{}", i)).collect();
            sql.push_str(&format!(" AND event_type IN ({})", placeholders.join(", ")));
            args.extend(types.iter().map(|t| t.as_str().to_string()));
        }
        if let Some(module) = &filter.module {
            args.push(module.clone());
            sql.push_str(&format!(" AND context = ?{} COLLATE NOCASE", args.len()));
        }
        sql.push_str(&format!(" ORDER BY timestamp DESC LIMIT {}", limit));

        let rows = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args.iter()), read_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        // an undecodable row is skipped so the rest of the window stays usable
        Ok(rows
            .into_iter()
            .filter_map(|row| match event_from_row(row) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("Skipping stored event: {:#}", e);
                    None
                }
            })
            .collect())
    }

    async fn mark_applied(&self, event_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        let updated = conn.execute("UPDATE learning_events SET applied = 1 WHERE id = ?1", params![event_id])?;
        if updated == 0 {
            anyhow::bail!("Event not found: {}", event_id);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PersonalityStore for SqliteLearningStore {
    async fn get_traits(&self, user_id: &str) -> Result<Option<PersonalityProfile>> {
        let row = {
            let conn = self.conn.lock().await;
            conn.query_row(
                "SELECT traits, last_updated FROM personality_profiles WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?
        };
        let Some((traits, last_updated)) = row else {
            return Ok(None);
        };
        Ok(Some(PersonalityProfile {
            user_id: user_id.to_string(),
            traits: serde_json::from_str(&traits).context("Corrupt trait map")?,
            last_updated: parse_timestamp(&last_updated)?,
        }))
    }

    async fn put_traits(
        &self,
        user_id: &str,
        traits: &BTreeMap<String, f64>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT OR REPLACE INTO personality_profiles (user_id, traits, last_updated)
               VALUES (?1, ?2, ?3)"#,
            params![user_id, serde_json::to_string(traits)?, timestamp(&at)],
        )?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AutonomySettingsStore for SqliteLearningStore {
    async fn get_autonomy(&self, user_id: &str) -> Result<Option<AutonomySettings>> {
        let raw: Option<String> = {
            let conn = self.conn.lock().await;
            conn.query_row(
                "SELECT settings FROM autonomy_settings WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?
        };
        raw.map(|s| serde_json::from_str(&s).context("Corrupt autonomy settings"))
            .transpose()
    }
}

#[async_trait::async_trait]
impl FactStore for SqliteLearningStore {
    async fn put_fact(&self, fact: &Fact) -> Result<bool> {
        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            r#"INSERT OR IGNORE INTO user_facts (user_id, module, statement, recorded_at)
               VALUES (?1, ?2, ?3, ?4)"#,
            params![fact.user_id, fact.module, fact.statement, timestamp(&fact.recorded_at)],
        )?;
        Ok(inserted > 0)
    }

    async fn facts_for(&self, user_id: &str, limit: usize) -> Result<Vec<Fact>> {
        let rows = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare_cached(
                r#"SELECT module, statement, recorded_at FROM user_facts
                   WHERE user_id = ?1 ORDER BY recorded_at DESC LIMIT ?2"#,
            )?;
            let rows = stmt.query_map(params![user_id, limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        rows.into_iter()
            .map(|(module, statement, recorded_at)| {
                Ok(Fact {
                    user_id: user_id.to_string(),
                    module,
                    statement,
                    recorded_at: parse_timestamp(&recorded_at)?,
                })
            })
            .collect()
    }
}
