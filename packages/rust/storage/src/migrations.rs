//! SQL migration definitions for the paperlink ledger.
//!
//! Migrations are applied in order on open. Each migration has a version
//! number and a batch of SQL statements; every statement is idempotent so
//! re-running a migration against an existing file is harmless.

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
            description: "Initial schema: search_hits ledger",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per arXiv id: the enrichment result plus its publish state
CREATE TABLE IF NOT EXISTS search_hits (
    arxiv_id            TEXT PRIMARY KEY,
    qid                 TEXT,
    title               TEXT,
    repo_url            TEXT,
    is_official         INTEGER NOT NULL DEFAULT 0,
    mentioned_in_paper  INTEGER NOT NULL DEFAULT 0,
    mentioned_in_github INTEGER NOT NULL DEFAULT 0,
    reference_url       TEXT,
    snippet             TEXT NOT NULL DEFAULT '',
    published           INTEGER NOT NULL DEFAULT 0,
    ingested_at         TEXT NOT NULL,
    published_at        TEXT
);

INSERT OR IGNORE INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Index the publisher work queue",
            sql: r#"
CREATE INDEX IF NOT EXISTS idx_search_hits_pending ON search_hits(published, qid);

INSERT OR IGNORE INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
