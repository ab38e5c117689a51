//! SQL migration definitions for the Roadmend database.
//!
//! Migrations are applied in order on database open. Each migration records
//! its own version in `schema_migrations` as its last statement.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: roadmaps, invalid_study_links",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Generated roadmaps (written by the generation service, patched by the repair job)
CREATE TABLE IF NOT EXISTS roadmaps (
    id           TEXT PRIMARY KEY,
    user_id      TEXT,
    domain       TEXT NOT NULL,
    roadmap_json TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_roadmaps_user_domain ON roadmaps(user_id, domain);

-- Audit history of every invalid study link instance
CREATE TABLE IF NOT EXISTS invalid_study_links (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    roadmap_id   TEXT NOT NULL,
    stage_index  INTEGER NOT NULL,
    step_index   INTEGER NOT NULL,
    original_url TEXT NOT NULL,
    status_code  TEXT NOT NULL,
    ai_prompt    TEXT,
    ai_response  TEXT,
    new_url      TEXT,
    resolved_at  TEXT,
    checked_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_invalid_links_roadmap ON invalid_study_links(roadmap_id);

-- At most one unresolved record per occurrence
CREATE UNIQUE INDEX IF NOT EXISTS idx_invalid_links_unresolved
    ON invalid_study_links(roadmap_id, stage_index, step_index, original_url)
    WHERE resolved_at IS NULL;

INSERT OR IGNORE INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Run leases for database-backed mutual exclusion",
            sql: r#"
CREATE TABLE IF NOT EXISTS run_leases (
    name           TEXT PRIMARY KEY,
    holder         TEXT NOT NULL,
    acquired_at_ms INTEGER NOT NULL,
    expires_at_ms  INTEGER NOT NULL
);

INSERT OR IGNORE INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
