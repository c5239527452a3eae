//! Sync Store
//!
//! Topics, Source Runs and Bricks. The compile boundary
//! (`source_runs.last_processed_index`) only ever moves forward, and moves
//! in the same transaction that commits the bricks produced by that pass.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::migrations;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Store error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

// ============================================================================
// RECORD TYPES
// ============================================================================

/// An extraction contract: what to pull out of a run, and what to leave alone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub display_name: String,
    pub definition: TopicDefinition,
    pub ordering_rule: String,
    pub state: String,
}

/// The extraction contract body handed to the extractor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicDefinition {
    pub scope_description: String,
    #[serde(default)]
    pub exclusion_criteria: Vec<String>,
}

/// A registered Source Run with its compile boundary
#[derive(Debug, Clone)]
pub struct SourceRunRecord {
    pub id: String,
    pub raw_content: Value,
    pub status: String,
    pub last_processed_index: i64,
}

/// Brick lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BrickState {
    #[default]
    Improvise,
    Forming,
    Final,
    Superseded,
}

impl BrickState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrickState::Improvise => "IMPROVISE",
            BrickState::Forming => "FORMING",
            BrickState::Final => "FINAL",
            BrickState::Superseded => "SUPERSEDED",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "FORMING" => BrickState::Forming,
            "FINAL" => BrickState::Final,
            "SUPERSEDED" => BrickState::Superseded,
            _ => BrickState::Improvise,
        }
    }
}

/// Exact source coordinates of a brick's quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAddress {
    pub run_id: String,
    pub json_path: String,
    pub start_index: usize,
    pub end_index: usize,
    /// sha256 hex of the full resolved node text
    pub checksum: String,
}

/// A materialised atomic claim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brick {
    /// sha256(topic_id || fingerprint)
    pub id: String,
    pub topic_id: String,
    /// Verbatim quote, byte-identical to `source[start_index..end_index]`
    pub content: String,
    /// sha256(lowercased, trimmed content)
    pub fingerprint: String,
    pub state: BrickState,
    #[serde(default = "default_scope")]
    pub scope: String,
    pub source_address: SourceAddress,
}

fn default_scope() -> String {
    "global".to_string()
}

// ============================================================================
// CONNECTION SETUP
// ============================================================================

/// Apply PRAGMAs shared by every store that opens the kiln database
pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA temp_store = MEMORY;",
    )
}

// ============================================================================
// SYNC STORE
// ============================================================================

/// SQLite store for topics, runs and bricks.
///
/// All methods take `&self`; the connection sits behind a `Mutex` so the
/// store is `Send + Sync` and callers can share it via `Arc`.
pub struct SyncStore {
    conn: Mutex<Connection>,
}

impl SyncStore {
    /// Open (and migrate) the database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Init(format!("cannot create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        configure_connection(&conn)?;
        migrations::apply_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Init("connection lock poisoned".to_string()))
    }

    // ------------------------------------------------------------------
    // Topics
    // ------------------------------------------------------------------

    /// Register a topic. Idempotent: an existing id is left untouched.
    pub fn create_topic(&self, topic: &Topic) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO topics (id, display_name, definition_json, ordering_rule, state)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                topic.id,
                topic.display_name,
                serde_json::to_string(&topic.definition)?,
                topic.ordering_rule,
                topic.state,
            ],
        )?;
        Ok(())
    }

    pub fn get_topic(&self, topic_id: &str) -> Result<Option<Topic>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, display_name, definition_json, ordering_rule, state
                 FROM topics WHERE id = ?1",
                params![topic_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, display_name, definition_json, ordering_rule, state)| {
            Ok(Topic {
                id,
                display_name,
                definition: serde_json::from_str(&definition_json)?,
                ordering_rule,
                state,
            })
        })
        .transpose()
    }

    pub fn get_all_topics(&self) -> Result<Vec<Topic>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, display_name, definition_json, ordering_rule, state FROM topics ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut topics = Vec::new();
        for row in rows {
            let (id, display_name, definition_json, ordering_rule, state) = row?;
            topics.push(Topic {
                id,
                display_name,
                definition: serde_json::from_str(&definition_json)?,
                ordering_rule,
                state,
            });
        }
        Ok(topics)
    }

    // ------------------------------------------------------------------
    // Source runs
    // ------------------------------------------------------------------

    /// Register a run. Idempotent: re-registering an existing id keeps the
    /// stored content and, crucially, the compile boundary.
    pub fn register_run(&self, run_id: &str, raw_content: &Value) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO source_runs (id, raw_content, status) VALUES (?1, ?2, 'CLOSED')",
            params![run_id, serde_json::to_string(raw_content)?],
        )?;
        Ok(())
    }

    /// Replace a run's raw content in place, preserving its boundary.
    /// Used when a conversation grew and the same path re-linearises longer.
    pub fn refresh_run_content(&self, run_id: &str, raw_content: &Value) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO source_runs (id, raw_content, status) VALUES (?1, ?2, 'CLOSED')
             ON CONFLICT(id) DO UPDATE SET raw_content = excluded.raw_content",
            params![run_id, serde_json::to_string(raw_content)?],
        )?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<SourceRunRecord>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, raw_content, status, last_processed_index
                 FROM source_runs WHERE id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, raw, status, last_processed_index)| {
            Ok(SourceRunRecord {
                id,
                raw_content: serde_json::from_str(&raw)?,
                status,
                last_processed_index,
            })
        })
        .transpose()
    }

    pub fn get_all_run_ids(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM source_runs ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Advance the compile boundary. Monotonic: lowering attempts are no-ops.
    /// Returns whether the boundary actually moved.
    pub fn advance_boundary(&self, run_id: &str, new_index: i64) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE source_runs SET last_processed_index = ?2
             WHERE id = ?1 AND last_processed_index < ?2",
            params![run_id, new_index],
        )?;
        Ok(changed > 0)
    }

    // ------------------------------------------------------------------
    // Bricks
    // ------------------------------------------------------------------

    /// Upsert one brick (`INSERT OR REPLACE` on the content-derived id)
    pub fn upsert_brick(&self, brick: &Brick) -> Result<(), StoreError> {
        let conn = self.lock()?;
        Self::upsert_brick_on(&conn, brick)
    }

    fn upsert_brick_on(conn: &Connection, brick: &Brick) -> Result<(), StoreError> {
        conn.execute(
            "INSERT OR REPLACE INTO bricks (
                id, topic_id, content, fingerprint, state, scope,
                run_id, json_path, start_index, end_index, source_checksum
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                brick.id,
                brick.topic_id,
                brick.content,
                brick.fingerprint,
                brick.state.as_str(),
                brick.scope,
                brick.source_address.run_id,
                brick.source_address.json_path,
                brick.source_address.start_index as i64,
                brick.source_address.end_index as i64,
                brick.source_address.checksum,
            ],
        )?;
        Ok(())
    }

    /// Commit one compile pass atomically: every brick it produced plus the
    /// boundary advance. A crash before this call leaves the boundary where
    /// it was; re-running re-materialises identical bricks idempotently.
    pub fn commit_compilation(
        &self,
        run_id: &str,
        bricks: &[Brick],
        max_index: i64,
    ) -> Result<bool, StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction()?;
        for brick in bricks {
            Self::upsert_brick_on(&tx, brick)?;
        }
        let advanced = tx.execute(
            "UPDATE source_runs SET last_processed_index = ?2
             WHERE id = ?1 AND last_processed_index < ?2",
            params![run_id, max_index],
        )? > 0;
        tx.commit()?;
        Ok(advanced)
    }

    pub fn get_brick(&self, brick_id: &str) -> Result<Option<Brick>, StoreError> {
        let conn = self.lock()?;
        let brick = conn
            .query_row(
                &format!("{BRICK_SELECT} WHERE id = ?1"),
                params![brick_id],
                row_to_brick,
            )
            .optional()?;
        Ok(brick)
    }

    pub fn get_bricks_for_topic(&self, topic_id: &str) -> Result<Vec<Brick>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare(&format!("{BRICK_SELECT} WHERE topic_id = ?1 ORDER BY created_at ASC"))?;
        let bricks = stmt
            .query_map(params![topic_id], row_to_brick)?
            .collect::<rusqlite::Result<Vec<Brick>>>()?;
        Ok(bricks)
    }

    pub fn get_bricks_for_run(&self, run_id: &str) -> Result<Vec<Brick>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare(&format!("{BRICK_SELECT} WHERE run_id = ?1 ORDER BY id ASC"))?;
        let bricks = stmt
            .query_map(params![run_id], row_to_brick)?
            .collect::<rusqlite::Result<Vec<Brick>>>()?;
        Ok(bricks)
    }

    /// Every brick in the vault, id-ordered. Used for index rebuilds.
    pub fn get_all_bricks(&self) -> Result<Vec<Brick>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{BRICK_SELECT} ORDER BY id ASC"))?;
        let bricks = stmt
            .query_map([], row_to_brick)?
            .collect::<rusqlite::Result<Vec<Brick>>>()?;
        Ok(bricks)
    }
}

const BRICK_SELECT: &str = "SELECT id, topic_id, content, fingerprint, state, scope,
        run_id, json_path, start_index, end_index, source_checksum FROM bricks";

fn row_to_brick(row: &rusqlite::Row<'_>) -> rusqlite::Result<Brick> {
    Ok(Brick {
        id: row.get(0)?,
        topic_id: row.get(1)?,
        content: row.get(2)?,
        fingerprint: row.get(3)?,
        state: BrickState::parse_name(&row.get::<_, String>(4)?),
        scope: row.get(5)?,
        source_address: SourceAddress {
            run_id: row.get(6)?,
            json_path: row.get(7)?,
            start_index: row.get::<_, i64>(8)? as usize,
            end_index: row.get::<_, i64>(9)? as usize,
            checksum: row.get(10)?,
        },
    })
}

// ============================================================================
// TESTS
// ============================================================================
