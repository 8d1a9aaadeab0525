//! SQLite-backed store.
//!
//! One connection behind a mutex; every call runs on the blocking pool.
//! JSON payload columns are decoded tolerantly: a malformed document becomes
//! the field's empty value and a warning. Identity columns are strict.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use gaptrack_core::{
    AuditFlags, AuditResult, CertaintyLevel, Context, MemoryGraph, NewRule, Rule, RuleSpec,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{AuditStore, ContextStore, RuleStore};
use crate::error::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS rules (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    rule_type   TEXT NOT NULL,
    conditions  TEXT NOT NULL DEFAULT '{}',
    actions     TEXT NOT NULL DEFAULT '{}',
    priority    INTEGER NOT NULL DEFAULT 0,
    is_active   INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS contexts (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id  TEXT NOT NULL,
    turn_number INTEGER NOT NULL,
    user_input  TEXT NOT NULL,
    entities    TEXT,
    topics      TEXT,
    timeline    TEXT,
    assertions  TEXT,
    ambiguities TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    UNIQUE (session_id, turn_number)
);

CREATE TABLE IF NOT EXISTS sessions (
    session_id    TEXT PRIMARY KEY,
    context_graph TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_logs (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id      TEXT NOT NULL,
    turn_number     INTEGER NOT NULL,
    response_text   TEXT NOT NULL,
    certainty_level TEXT NOT NULL,
    flags           TEXT,
    assumptions     TEXT,
    contradictions  TEXT,
    retry_count     INTEGER NOT NULL DEFAULT 0,
    recommendations TEXT,
    quality_score   REAL NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rules_active ON rules (is_active, priority DESC);
CREATE INDEX IF NOT EXISTS idx_audit_logs_session ON audit_logs (session_id, turn_number);
";

const RULE_COLUMNS: &str = "id, name, description, rule_type, conditions, actions, priority, \
                            is_active, created_at, updated_at";

const RULE_ORDER: &str = "ORDER BY priority DESC, created_at ASC, id ASC";

const CONTEXT_COLUMNS: &str = "id, session_id, turn_number, user_input, entities, topics, \
                               timeline, assertions, ambiguities, created_at, updated_at";

const AUDIT_COLUMNS: &str = "id, session_id, turn_number, response_text, certainty_level, flags, \
                             assumptions, contradictions, retry_count, recommendations, \
                             quality_score, created_at";

/// Store over a single SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        tracing::info!(path = %path.display(), "Opened SQLite store");
        Self::with_connection(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

// Row decoding

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Decode an optional JSON column, falling back to the default on bad data.
fn decode_json<T: DeserializeOwned + Default>(column: &'static str, raw: Option<String>) -> T {
    let Some(raw) = raw else {
        return T::default();
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        tracing::warn!(column, error = %e, "Malformed JSON column, using empty value");
        T::default()
    })
}

fn encode_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    Ok(serde_json::to_string(value)?)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn duplicate_name(err: rusqlite::Error, name: &str) -> StoreError {
    if is_constraint_violation(&err) {
        StoreError::Conflict(format!("rule name '{}' already exists", name))
    } else {
        StoreError::Sqlite(err)
    }
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<Rule> {
    let rule_type: String = row.get(3)?;
    let conditions = decode_json::<serde_json::Value>("rules.conditions", row.get(4)?);
    let actions = decode_json::<serde_json::Value>("rules.actions", row.get(5)?);
    Ok(Rule {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        spec: RuleSpec::decode(&rule_type, conditions, actions),
        priority: row.get(6)?,
        is_active: row.get(7)?,
        created_at: parse_timestamp(row, 8)?,
        updated_at: parse_timestamp(row, 9)?,
    })
}

fn context_from_row(row: &Row<'_>) -> rusqlite::Result<Context> {
    Ok(Context {
        id: row.get(0)?,
        session_id: row.get(1)?,
        turn_number: row.get(2)?,
        user_input: row.get(3)?,
        entities: decode_json("contexts.entities", row.get(4)?),
        topics: decode_json("contexts.topics", row.get(5)?),
        timeline: decode_json("contexts.timeline", row.get(6)?),
        assertions: decode_json("contexts.assertions", row.get(7)?),
        ambiguities: decode_json("contexts.ambiguities", row.get(8)?),
        created_at: parse_timestamp(row, 9)?,
        updated_at: parse_timestamp(row, 10)?,
    })
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<AuditResult> {
    let level: String = row.get(4)?;
    let certainty_level = CertaintyLevel::parse(&level).unwrap_or_else(|| {
        tracing::warn!(certainty_level = %level, "Unknown certainty level, using medium");
        CertaintyLevel::Medium
    });
    Ok(AuditResult {
        id: row.get(0)?,
        session_id: row.get(1)?,
        turn_number: row.get(2)?,
        response_text: row.get(3)?,
        certainty_level,
        flags: decode_json::<AuditFlags>("audit_logs.flags", row.get(5)?),
        assumptions: decode_json("audit_logs.assumptions", row.get(6)?),
        contradictions: decode_json("audit_logs.contradictions", row.get(7)?),
        retry_count: row.get(8)?,
        recommendations: decode_json("audit_logs.recommendations", row.get(9)?),
        quality_score: row.get(10)?,
        created_at: parse_timestamp(row, 11)?,
    })
}

fn query_rules(conn: &Connection, active_only: bool) -> Result<Vec<Rule>, StoreError> {
    let filter = if active_only { "WHERE is_active = 1" } else { "" };
    let sql = format!("SELECT {} FROM rules {} {}", RULE_COLUMNS, filter, RULE_ORDER);
    let mut stmt = conn.prepare(&sql)?;
    let rules = stmt
        .query_map([], rule_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rules)
}

#[async_trait]
impl RuleStore for SqliteStore {
    async fn list_active(&self) -> Result<Vec<Rule>, StoreError> {
        self.call(|conn| query_rules(conn, true)).await
    }

    async fn list_all(&self) -> Result<Vec<Rule>, StoreError> {
        self.call(|conn| query_rules(conn, false)).await
    }

    async fn get(&self, id: i64) -> Result<Option<Rule>, StoreError> {
        self.call(move |conn| {
            let sql = format!("SELECT {} FROM rules WHERE id = ?1", RULE_COLUMNS);
            Ok(conn.query_row(&sql, params![id], rule_from_row).optional()?)
        })
        .await
    }

    async fn create(&self, rule: NewRule) -> Result<Rule, StoreError> {
        self.call(move |conn| {
            let now = Utc::now();
            let stamp = timestamp(&now);
            conn.execute(
                "INSERT INTO rules (name, description, rule_type, conditions, actions, priority,
                                    is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    rule.name,
                    rule.description,
                    rule.spec.rule_type().as_str(),
                    encode_json(&rule.spec.conditions_json())?,
                    encode_json(&rule.spec.actions_json())?,
                    rule.priority,
                    rule.is_active,
                    stamp,
                ],
            )
            .map_err(|e| duplicate_name(e, &rule.name))?;

            let id = conn.last_insert_rowid();
            Ok(rule.into_rule(id, now))
        })
        .await
    }

    async fn update(&self, mut rule: Rule) -> Result<Rule, StoreError> {
        self.call(move |conn| {
            let now = Utc::now();
            let created_at = conn
                .query_row(
                    "UPDATE rules
                     SET name = ?1, description = ?2, rule_type = ?3, conditions = ?4,
                         actions = ?5, priority = ?6, is_active = ?7, updated_at = ?8
                     WHERE id = ?9
                     RETURNING created_at",
                    params![
                        rule.name,
                        rule.description,
                        rule.spec.rule_type().as_str(),
                        encode_json(&rule.spec.conditions_json())?,
                        encode_json(&rule.spec.actions_json())?,
                        rule.priority,
                        rule.is_active,
                        timestamp(&now),
                        rule.id,
                    ],
                    |row| parse_timestamp(row, 0),
                )
                .optional()
                .map_err(|e| duplicate_name(e, &rule.name))?
                .ok_or_else(|| StoreError::rule_not_found(rule.id))?;

            rule.created_at = created_at;
            rule.updated_at = now;
            Ok(rule)
        })
        .await
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        self.call(move |conn| {
            let removed = conn.execute("DELETE FROM rules WHERE id = ?1", params![id])?;
            Ok(removed > 0)
        })
        .await
    }
}

#[async_trait]
impl ContextStore for SqliteStore {
    async fn upsert_turn(&self, mut turn: Context) -> Result<Context, StoreError> {
        self.call(move |conn| {
            let now = Utc::now();
            let (id, created_at) = conn.query_row(
                "INSERT INTO contexts (session_id, turn_number, user_input, entities, topics,
                                       timeline, assertions, ambiguities, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                 ON CONFLICT (session_id, turn_number) DO UPDATE SET
                     user_input = excluded.user_input,
                     entities = excluded.entities,
                     topics = excluded.topics,
                     timeline = excluded.timeline,
                     assertions = excluded.assertions,
                     ambiguities = excluded.ambiguities,
                     updated_at = excluded.updated_at
                 RETURNING id, created_at",
                params![
                    turn.session_id,
                    turn.turn_number,
                    turn.user_input,
                    encode_json(&turn.entities)?,
                    encode_json(&turn.topics)?,
                    encode_json(&turn.timeline)?,
                    encode_json(&turn.assertions)?,
                    encode_json(&turn.ambiguities)?,
                    timestamp(&now),
                ],
                |row| Ok((row.get::<_, i64>(0)?, parse_timestamp(row, 1)?)),
            )?;

            turn.id = id;
            turn.created_at = created_at;
            turn.updated_at = now;
            Ok(turn)
        })
        .await
    }

    async fn get_turn(
        &self,
        session_id: &str,
        turn_number: u32,
    ) -> Result<Option<Context>, StoreError> {
        let session_id = session_id.to_string();
        self.call(move |conn| {
            let sql = format!(
                "SELECT {} FROM contexts WHERE session_id = ?1 AND turn_number = ?2",
                CONTEXT_COLUMNS
            );
            Ok(conn
                .query_row(&sql, params![session_id, turn_number], context_from_row)
                .optional()?)
        })
        .await
    }

    async fn list_turns(&self, session_id: &str) -> Result<Vec<Context>, StoreError> {
        let session_id = session_id.to_string();
        self.call(move |conn| {
            let sql = format!(
                "SELECT {} FROM contexts WHERE session_id = ?1 ORDER BY turn_number ASC",
                CONTEXT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let turns = stmt
                .query_map(params![session_id], context_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(turns)
        })
        .await
    }

    async fn get_memory_graph(&self, session_id: &str) -> Result<Option<MemoryGraph>, StoreError> {
        let session_id = session_id.to_string();
        self.call(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT context_graph FROM sessions WHERE session_id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .optional()?;

            // A graph that no longer decodes is treated as absent and rebuilt
            Ok(raw.and_then(|raw| match serde_json::from_str(&raw) {
                Ok(graph) => Some(graph),
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Malformed memory graph");
                    None
                }
            }))
        })
        .await
    }

    async fn put_memory_graph(&self, graph: &MemoryGraph) -> Result<(), StoreError> {
        let session_id = graph.session_id.clone();
        let encoded = encode_json(graph)?;
        let updated_at = timestamp(&graph.updated_at);
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO sessions (session_id, context_graph, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (session_id) DO UPDATE SET
                     context_graph = excluded.context_graph,
                     updated_at = excluded.updated_at",
                params![session_id, encoded, updated_at],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl AuditStore for SqliteStore {
    async fn insert_audit(&self, mut audit: AuditResult) -> Result<AuditResult, StoreError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO audit_logs (session_id, turn_number, response_text, certainty_level,
                                         flags, assumptions, contradictions, retry_count,
                                         recommendations, quality_score, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    audit.session_id,
                    audit.turn_number,
                    audit.response_text,
                    audit.certainty_level.as_str(),
                    encode_json(&audit.flags)?,
                    encode_json(&audit.assumptions)?,
                    encode_json(&audit.contradictions)?,
                    audit.retry_count,
                    encode_json(&audit.recommendations)?,
                    audit.quality_score,
                    timestamp(&audit.created_at),
                ],
            )?;
            audit.id = conn.last_insert_rowid();
            Ok(audit)
        })
        .await
    }

    async fn list_audits(&self, session_id: &str) -> Result<Vec<AuditResult>, StoreError> {
        let session_id = session_id.to_string();
        self.call(move |conn| {
            let sql = format!(
                "SELECT {} FROM audit_logs WHERE session_id = ?1 ORDER BY turn_number ASC, id ASC",
                AUDIT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let audits = stmt
                .query_map(params![session_id], audit_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(audits)
        })
        .await
    }

    async fn increment_retry(&self, audit_id: i64) -> Result<u32, StoreError> {
        self.call(move |conn| {
            conn.query_row(
                "UPDATE audit_logs SET retry_count = retry_count + 1 WHERE id = ?1
                 RETURNING retry_count",
                params![audit_id],
                |row| row.get::<_, u32>(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::audit_not_found(audit_id))
        })
        .await
    }
}
