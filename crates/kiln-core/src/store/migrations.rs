//! Database Migrations
//!
//! Schema migration definitions for the shared kiln database: sync tables
//! (topics, source_runs, bricks), graph tables (nodes, edges) and the prompt
//! governance table.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: topics, source runs, bricks, graph, prompts",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Brick scopes for recall ACLs",
        up: MIGRATION_V2_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
-- Extraction contracts
CREATE TABLE IF NOT EXISTS topics (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    definition_json TEXT NOT NULL,
    ordering_rule TEXT NOT NULL DEFAULT 'chronological',
    state TEXT NOT NULL DEFAULT 'ACTIVE',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Linearised conversation paths. last_processed_index is the monotonic
-- compile boundary: -1 means nothing compiled yet.
CREATE TABLE IF NOT EXISTS source_runs (
    id TEXT PRIMARY KEY,
    raw_content TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'CLOSED',
    last_processed_index INTEGER NOT NULL DEFAULT -1,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Verified atomic claims. id = sha256(topic_id || fingerprint), so identical
-- normalised quotes for a topic collapse to one row.
CREATE TABLE IF NOT EXISTS bricks (
    id TEXT PRIMARY KEY,
    topic_id TEXT NOT NULL,
    content TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'IMPROVISE',
    run_id TEXT NOT NULL,
    json_path TEXT NOT NULL,
    start_index INTEGER NOT NULL,
    end_index INTEGER NOT NULL,
    source_checksum TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (topic_id, fingerprint)
);

CREATE INDEX IF NOT EXISTS idx_bricks_topic ON bricks(topic_id);
CREATE INDEX IF NOT EXISTS idx_bricks_run ON bricks(run_id);

-- Knowledge graph
CREATE TABLE IF NOT EXISTS nodes (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(type);

CREATE TABLE IF NOT EXISTS edges (
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    type TEXT NOT NULL,
    data TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (source, target, type),
    FOREIGN KEY (source) REFERENCES nodes(id),
    FOREIGN KEY (target) REFERENCES nodes(id)
);

CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target);
CREATE INDEX IF NOT EXISTS idx_edges_type ON edges(type);

-- Prompt governance: prompts are versioned like code
CREATE TABLE IF NOT EXISTS prompts (
    slug TEXT NOT NULL,
    version INTEGER NOT NULL,
    content TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'system',
    description TEXT,
    metadata TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (slug, version)
);

CREATE INDEX IF NOT EXISTS idx_prompts_slug ON prompts(slug);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: Brick scopes. Recall's ACL filter reads this; 'global' is visible to
/// every caller.
const MIGRATION_V2_UP: &str = r#"
ALTER TABLE bricks ADD COLUMN scope TEXT NOT NULL DEFAULT 'global';

CREATE INDEX IF NOT EXISTS idx_bricks_scope ON bricks(scope);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}

// ============================================================================
// TESTS
// ============================================================================
