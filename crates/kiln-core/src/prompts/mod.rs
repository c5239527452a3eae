//! Prompt Governance
//!
//! Prompts are treated like code: versioned, addressed by `(slug, version)`,
//! and gated by an allow-list. A missing prompt only ever degrades to a
//! caller-supplied fallback; a missing *critical* prompt with no fallback
//! fails closed. Every resolution path is audited, so an experiment that ran
//! on a fallback is distinguishable from one that ran on a governed prompt.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::{AuditEvent, AuditEventType, AuditLog, DecisionAction};
use crate::store::configure_connection;
use crate::store::migrations;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Prompt store error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A required prompt is missing and no safe degradation exists
    #[error("critical prompt '{slug}' missing from governance store and no fallback provided")]
    GovernanceViolation { slug: String },
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

// ============================================================================
// CONFIG & RECORDS
// ============================================================================

/// Deployment policy: which slugs are sanctioned, and which fail closed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Slugs allowed to degrade to a fallback without raising
    pub approved_slugs: Vec<String>,
    /// Slugs that must exist (or have a fallback) for the system to proceed
    pub critical_slugs: Vec<String>,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            approved_slugs: vec![
                "compiler-extraction-system".to_string(),
                "cognition-synthesis".to_string(),
            ],
            critical_slugs: vec!["compiler-extraction-system".to_string()],
        }
    }
}

impl GovernanceConfig {
    fn is_approved(&self, slug: &str) -> bool {
        self.approved_slugs.iter().any(|s| s == slug)
    }

    fn is_critical(&self, slug: &str) -> bool {
        self.critical_slugs.iter().any(|s| s == slug)
    }
}

/// One stored prompt version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRecord {
    pub slug: String,
    pub version: i64,
    pub content: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: String,
}

// ============================================================================
// PROMPT STORE
// ============================================================================

/// Versioned, governed prompt repository.
///
/// An in-process cache sits in front of the table, keyed by
/// `slug:version` (or `slug:latest`); every write invalidates the keys it
/// could have changed.
pub struct PromptStore {
    conn: Mutex<Connection>,
    cache: Mutex<HashMap<String, String>>,
    config: GovernanceConfig,
    audit: AuditLog,
}

impl PromptStore {
    /// Open the store over the shared kiln database
    pub fn open(path: &Path, config: GovernanceConfig, audit: AuditLog) -> Result<Self, PromptError> {
        let conn = Connection::open(path)?;
        configure_connection(&conn)?;
        migrations::apply_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            cache: Mutex::new(HashMap::new()),
            config,
            audit,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, PromptError> {
        self.conn
            .lock()
            .map_err(|_| PromptError::Init("connection lock poisoned".to_string()))
    }

    fn cache_key(slug: &str, version: Option<i64>) -> String {
        match version {
            Some(v) => format!("{slug}:{v}"),
            None => format!("{slug}:latest"),
        }
    }

    fn audit_event(&self, event: AuditEvent) {
        if let Err(e) = self.audit.emit(event) {
            tracing::warn!("prompt governance audit emit failed: {e}");
        }
    }

    /// Resolve a prompt.
    ///
    /// - exact `(slug, version)` when a version is given, otherwise the
    ///   highest version for the slug
    /// - missing + fallback: the fallback is returned, with
    ///   `PROMPT_FALLBACK_USED` (and `PROMPT_NOT_APPROVED` first if the slug
    ///   is outside the allow-list)
    /// - missing + no fallback: `GovernanceViolation`
    pub fn get_prompt(
        &self,
        slug: &str,
        version: Option<i64>,
        fallback: Option<&str>,
    ) -> Result<String, PromptError> {
        let key = Self::cache_key(slug, version);
        if let Ok(cache) = self.cache.lock() {
            if let Some(content) = cache.get(&key) {
                return Ok(content.clone());
            }
        }

        let row: Option<(String, i64)> = {
            let conn = self.lock()?;
            match version {
                Some(v) => conn
                    .query_row(
                        "SELECT content, version FROM prompts WHERE slug = ?1 AND version = ?2",
                        params![slug, v],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?,
                None => conn
                    .query_row(
                        "SELECT content, version FROM prompts WHERE slug = ?1
                         ORDER BY version DESC LIMIT 1",
                        params![slug],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?,
            }
        };

        if let Some((content, resolved_version)) = row {
            if let Ok(mut cache) = self.cache.lock() {
                cache.insert(key, content.clone());
            }
            self.audit_event(
                AuditEvent::new(
                    AuditEventType::PromptLoaded,
                    "governance",
                    "prompt-store",
                    DecisionAction::Accepted,
                    format!("resolved '{slug}' v{resolved_version}"),
                )
                .with_metadata(serde_json::json!({
                    "slug": slug,
                    "version": resolved_version,
                    "requested_version": version,
                })),
            );
            return Ok(content);
        }

        // Missing from the store: governance rules take over
        if !self.config.is_approved(slug) {
            self.audit_event(
                AuditEvent::new(
                    AuditEventType::PromptNotApproved,
                    "governance",
                    "prompt-store",
                    DecisionAction::Skipped,
                    format!("prompt slug '{slug}' is not in the approved set"),
                )
                .with_metadata(serde_json::json!({ "slug": slug })),
            );
        }

        match fallback {
            Some(content) => {
                tracing::warn!("prompt '{slug}' not found in store, using fallback");
                self.audit_event(
                    AuditEvent::new(
                        AuditEventType::PromptFallbackUsed,
                        "governance",
                        "prompt-store",
                        DecisionAction::Accepted,
                        format!("prompt '{slug}' used hardcoded fallback"),
                    )
                    .with_metadata(serde_json::json!({
                        "slug": slug,
                        "version_requested": version,
                    })),
                );
                Ok(content.to_string())
            }
            None => {
                self.audit_event(
                    AuditEvent::new(
                        AuditEventType::PromptGovernanceViolation,
                        "governance",
                        "prompt-store",
                        DecisionAction::Blocked,
                        if self.config.is_critical(slug) {
                            format!("critical prompt '{slug}' missing, failing closed")
                        } else {
                            format!("prompt '{slug}' missing and no fallback provided")
                        },
                    )
                    .with_metadata(serde_json::json!({ "slug": slug })),
                );
                Err(PromptError::GovernanceViolation {
                    slug: slug.to_string(),
                })
            }
        }
    }

    /// Insert a new version for `slug` (max existing + 1) and invalidate the
    /// cache keys it shadows. Returns the new version number.
    pub fn save_prompt(
        &self,
        slug: &str,
        content: &str,
        role: &str,
        description: Option<&str>,
        metadata: Option<&Value>,
    ) -> Result<i64, PromptError> {
        let next_version = {
            let conn = self.lock()?;
            let current: Option<i64> = conn.query_row(
                "SELECT MAX(version) FROM prompts WHERE slug = ?1",
                params![slug],
                |row| row.get(0),
            )?;
            let next_version = current.unwrap_or(0) + 1;

            conn.execute(
                "INSERT INTO prompts (slug, version, content, role, description, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    slug,
                    next_version,
                    content,
                    role,
                    description,
                    metadata.map(serde_json::to_string).transpose()?,
                ],
            )?;
            next_version
        };

        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(&Self::cache_key(slug, None));
            cache.remove(&Self::cache_key(slug, Some(next_version)));
        }

        Ok(next_version)
    }

    /// The highest version of every slug in the store
    pub fn latest_prompts(&self) -> Result<Vec<PromptRecord>, PromptError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT p1.slug, p1.version, p1.content, p1.role, p1.description, p1.metadata, p1.created_at
             FROM prompts p1
             INNER JOIN (
                 SELECT slug, MAX(version) AS max_v FROM prompts GROUP BY slug
             ) p2 ON p1.slug = p2.slug AND p1.version = p2.max_v
             ORDER BY p1.slug",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (slug, version, content, role, description, metadata, created_at) = row?;
            records.push(PromptRecord {
                slug,
                version,
                content,
                role,
                description,
                metadata: metadata.map(|m| serde_json::from_str(&m)).transpose()?,
                created_at,
            });
        }
        Ok(records)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditFilter;

    fn open_store(config: GovernanceConfig) -> (tempfile::TempDir, PromptStore, AuditLog) {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::open(&dir.path().join("audit.jsonl")).unwrap();
        let store = PromptStore::open(&dir.path().join("kiln.db"), config, audit.clone()).unwrap();
        (dir, store, audit)
    }

    #[test]
    fn test_versions_increase_per_slug() {
        let (_dir, store, _audit) = open_store(GovernanceConfig::default());
        let v1 = store.save_prompt("a", "one", "system", None, None).unwrap();
        let v2 = store.save_prompt("a", "two", "system", None, None).unwrap();
        let other = store.save_prompt("b", "uno", "system", None, None).unwrap();
        assert_eq!((v1, v2, other), (1, 2, 1));
    }

    #[test]
    fn test_get_exact_and_latest() {
        let (_dir, store, _audit) = open_store(GovernanceConfig::default());
        store.save_prompt("a", "one", "system", None, None).unwrap();
        store.save_prompt("a", "two", "system", None, None).unwrap();

        assert_eq!(store.get_prompt("a", Some(1), None).unwrap(), "one");
        assert_eq!(store.get_prompt("a", None, None).unwrap(), "two");
    }

    #[test]
    fn test_cache_invalidated_on_save() {
        let (_dir, store, _audit) = open_store(GovernanceConfig::default());
        store.save_prompt("a", "one", "system", None, None).unwrap();
        assert_eq!(store.get_prompt("a", None, None).unwrap(), "one");

        // "latest" must not serve the stale cached copy after a write
        store.save_prompt("a", "two", "system", None, None).unwrap();
        assert_eq!(store.get_prompt("a", None, None).unwrap(), "two");
    }

    #[test]
    fn test_missing_with_fallback_degrades() {
        let (_dir, store, audit) = open_store(GovernanceConfig::default());
        let got = store
            .get_prompt("compiler-extraction-system", None, Some("builtin"))
            .unwrap();
        assert_eq!(got, "builtin");

        let events = audit
            .read_events(&AuditFilter {
                event: Some("PROMPT_FALLBACK_USED".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_unapproved_slug_is_flagged_then_degrades() {
        let (_dir, store, audit) = open_store(GovernanceConfig::default());
        let got = store.get_prompt("rogue-prompt", None, Some("fb")).unwrap();
        assert_eq!(got, "fb");

        let flagged = audit
            .read_events(&AuditFilter {
                event: Some("PROMPT_NOT_APPROVED".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(flagged.len(), 1);
    }

    #[test]
    fn test_critical_without_fallback_fails_closed() {
        let (_dir, store, audit) = open_store(GovernanceConfig::default());
        let err = store
            .get_prompt("compiler-extraction-system", None, None)
            .unwrap_err();
        assert!(matches!(err, PromptError::GovernanceViolation { .. }));

        let events = audit
            .read_events(&AuditFilter {
                event: Some("PROMPT_GOVERNANCE_VIOLATION".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_latest_prompts_lists_highest_versions() {
        let (_dir, store, _audit) = open_store(GovernanceConfig::default());
        store.save_prompt("a", "one", "system", None, None).unwrap();
        store.save_prompt("a", "two", "system", Some("v2"), None).unwrap();
        store.save_prompt("b", "uno", "user", None, None).unwrap();

        let latest = store.latest_prompts().unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].slug, "a");
        assert_eq!(latest[0].version, 2);
        assert_eq!(latest[0].content, "two");
        assert_eq!(latest[1].slug, "b");
    }
}
