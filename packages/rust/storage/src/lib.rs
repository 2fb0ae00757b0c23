//! Turso Embedded / libSQL ledger (offline mode).
//!
//! The [`Ledger`] struct wraps a libSQL database holding one row per arXiv id:
//! the enrichment result and its publication state.
//!
//! **Access rules:**
//! - ingest and publish: read-write via [`Ledger::open`]. Writes are serialized
//!   through an internal lock, so one `Arc<Ledger>` can be shared by workers.
//! - reporting: read-only via [`Ledger::open_readonly`]

mod migrations;

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use paperlink_shared::{LedgerRow, LedgerStats, PaperLinkError, PublishState, Result, SearchHit};
use tokio::sync::Mutex;

const ROW_COLUMNS: &str = "arxiv_id, qid, title, repo_url, is_official, mentioned_in_paper, \
     mentioned_in_github, reference_url, snippet, published, ingested_at, published_at";

/// Durable keyed table of search results with a publish flag.
pub struct Ledger {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    /// The backing file has no safe concurrent writers; one write at a time.
    write_lock: Mutex<()>,
}

impl Ledger {
    /// Open or create a ledger at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PaperLinkError::io(parent, e))?;
        }

        let (db, conn) = connect(path).await?;
        let ledger = Self {
            db,
            conn,
            readonly: false,
            write_lock: Mutex::new(()),
        };
        ledger.initialize().await?;
        Ok(ledger)
    }

    /// Open an existing ledger at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PaperLinkError::InputNotFound {
                path: path.to_path_buf(),
            });
        }

        let (db, conn) = connect(path).await?;
        Ok(Self {
            db,
            conn,
            readonly: true,
            write_lock: Mutex::new(()),
        })
    }

    /// Create the backing table if absent. Safe to call on every run.
    pub async fn initialize(&self) -> Result<()> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        PaperLinkError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(PaperLinkError::Storage(
                "ledger is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Insert or replace one row per hit, all in a single transaction.
    ///
    /// Every row gets the same ingestion timestamp. Rows that are already
    /// published keep their flag and publication timestamp.
    pub async fn upsert_hits(&self, hits: &[SearchHit]) -> Result<usize> {
        self.check_writable()?;
        if hits.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction().await.map_err(storage_err)?;
        for hit in hits {
            tx.execute(
                "INSERT INTO search_hits (arxiv_id, qid, title, repo_url, is_official,
                     mentioned_in_paper, mentioned_in_github, reference_url, snippet,
                     published, ingested_at, published_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, NULL)
                 ON CONFLICT(arxiv_id) DO UPDATE SET
                   qid = excluded.qid,
                   title = excluded.title,
                   repo_url = excluded.repo_url,
                   is_official = excluded.is_official,
                   mentioned_in_paper = excluded.mentioned_in_paper,
                   mentioned_in_github = excluded.mentioned_in_github,
                   reference_url = excluded.reference_url,
                   snippet = excluded.snippet,
                   ingested_at = excluded.ingested_at",
                params![
                    hit.arxiv_id.as_str(),
                    hit.qid.as_deref(),
                    hit.title.as_deref(),
                    hit.repo_url.as_deref(),
                    i64::from(hit.is_official),
                    i64::from(hit.mentioned_in_paper),
                    i64::from(hit.mentioned_in_github),
                    hit.reference_url.as_deref(),
                    hit.snippet.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| {
                PaperLinkError::Storage(format!("upsert of {} failed: {e}", hit.arxiv_id))
            })?;
        }
        tx.commit().await.map_err(storage_err)?;

        tracing::debug!(rows = hits.len(), "upserted search hits");
        Ok(hits.len())
    }

    /// Flip one row to published and stamp the publication time.
    ///
    /// Returns `false` when the row does not exist or was already published.
    pub async fn mark_published(&self, arxiv_id: &str) -> Result<bool> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;
        let now = Utc::now().to_rfc3339();

        let changed = self
            .conn
            .execute(
                "UPDATE search_hits SET published = 1, published_at = ?1
                 WHERE arxiv_id = ?2 AND published = 0",
                params![now.as_str(), arxiv_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(changed == 1)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Every natural key currently present, matched or not.
    pub async fn existing_keys(&self) -> Result<HashSet<String>> {
        let mut rows = self
            .conn
            .query("SELECT arxiv_id FROM search_hits", params![])
            .await
            .map_err(storage_err)?;

        let mut keys = HashSet::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            keys.insert(row.get::<String>(0).map_err(storage_err)?);
        }
        Ok(keys)
    }

    /// The publisher's work queue: resolved and not yet published, ordered by key.
    pub async fn unpublished_with_resolved_identifier(&self) -> Result<Vec<LedgerRow>> {
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM search_hits
             WHERE qid IS NOT NULL AND published = 0
             ORDER BY arxiv_id"
        );
        let mut rows = self
            .conn
            .query(&sql, params![])
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_ledger_row(&row)?);
        }
        Ok(results)
    }

    /// Look up a single row by arXiv id.
    pub async fn get(&self, arxiv_id: &str) -> Result<Option<LedgerRow>> {
        let sql = format!("SELECT {ROW_COLUMNS} FROM search_hits WHERE arxiv_id = ?1");
        let mut rows = self
            .conn
            .query(&sql, params![arxiv_id])
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_to_ledger_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Aggregate counts for reporting.
    pub async fn stats(&self) -> Result<LedgerStats> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN qid IS NOT NULL THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN published = 1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN qid IS NOT NULL AND published = 0 THEN 1 ELSE 0 END), 0)
                 FROM search_hits",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let Some(row) = rows.next().await.map_err(storage_err)? else {
            return Ok(LedgerStats::default());
        };
        let count = |idx: i32| -> Result<u64> {
            Ok(row.get::<i64>(idx).map_err(storage_err)?.max(0) as u64)
        };
        Ok(LedgerStats {
            total: count(0)?,
            resolved: count(1)?,
            published: count(2)?,
            pending: count(3)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn connect(path: &Path) -> Result<(Database, Connection)> {
    let db = libsql::Builder::new_local(path)
        .build()
        .await
        .map_err(storage_err)?;
    let conn = db.connect().map_err(storage_err)?;
    Ok((db, conn))
}

fn storage_err(e: libsql::Error) -> PaperLinkError {
    PaperLinkError::Storage(e.to_string())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PaperLinkError::Storage(format!("bad timestamp {raw:?}: {e}")))
}

/// Convert a libSQL row (selected with [`ROW_COLUMNS`]) into a [`LedgerRow`].
fn row_to_ledger_row(row: &libsql::Row) -> Result<LedgerRow> {
    let flag = |idx: i32| -> Result<bool> { Ok(row.get::<i64>(idx).map_err(storage_err)? != 0) };

    let hit = SearchHit {
        arxiv_id: row.get::<String>(0).map_err(storage_err)?,
        qid: row.get::<String>(1).ok(),
        title: row.get::<String>(2).ok(),
        repo_url: row.get::<String>(3).ok(),
        is_official: flag(4)?,
        mentioned_in_paper: flag(5)?,
        mentioned_in_github: flag(6)?,
        reference_url: row.get::<String>(7).ok(),
        snippet: row.get::<String>(8).unwrap_or_default(),
    };

    let state = if flag(9)? {
        PublishState::Published
    } else {
        PublishState::Unpublished
    };
    let ingested_at = parse_timestamp(&row.get::<String>(10).map_err(storage_err)?)?;
    let published_at = match row.get::<String>(11).ok() {
        Some(raw) => Some(parse_timestamp(&raw)?),
        None => None,
    };

    Ok(LedgerRow {
        hit,
        state,
        ingested_at,
        published_at,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use uuid::Uuid;

    fn temp_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("pl_test_{}.db", Uuid::now_v7()))
    }

    /// Create a temp file ledger for testing.
    async fn test_ledger() -> Ledger {
        Ledger::open(&temp_path()).await.expect("open test db")
    }

    fn hit(arxiv_id: &str, qid: Option<&str>) -> SearchHit {
        SearchHit {
            arxiv_id: arxiv_id.into(),
            qid: qid.map(str::to_string),
            title: qid.map(|q| format!("Publication {q}")),
            repo_url: Some(format!("https://github.com/x/{arxiv_id}")),
            is_official: true,
            mentioned_in_paper: true,
            mentioned_in_github: false,
            reference_url: Some(format!("https://paperswithcode.com/paper/{arxiv_id}")),
            snippet: qid.map(|q| format!("QID{q}")).unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let ledger = test_ledger().await;
        let version = ledger.get_schema_version().await;
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn idempotent_initialize() {
        let tmp = temp_path();
        let l1 = Ledger::open(&tmp).await.expect("first open");
        l1.initialize().await.expect("re-initialize");
        drop(l1);
        let l2 = Ledger::open(&tmp).await.expect("second open");
        assert_eq!(l2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_last_write_wins() {
        let ledger = test_ledger().await;
        ledger
            .upsert_hits(&[hit("2104.06175", None)])
            .await
            .expect("first upsert");
        ledger
            .upsert_hits(&[hit("2104.06175", Some("Q12345"))])
            .await
            .expect("second upsert");

        let stats = ledger.stats().await.expect("stats");
        assert_eq!(stats.total, 1);

        let row = ledger.get("2104.06175").await.expect("get").expect("row");
        assert_eq!(row.hit.qid.as_deref(), Some("Q12345"));
        assert_eq!(row.hit.snippet, "QIDQ12345");
        assert_eq!(row.state, PublishState::Unpublished);
        assert!(row.published_at.is_none());
    }

    #[tokio::test]
    async fn reingest_keeps_published_flag() {
        let ledger = test_ledger().await;
        ledger
            .upsert_hits(&[hit("2104.06175", Some("Q12345"))])
            .await
            .unwrap();
        assert!(ledger.mark_published("2104.06175").await.unwrap());

        ledger
            .upsert_hits(&[hit("2104.06175", Some("Q12345"))])
            .await
            .unwrap();

        let row = ledger.get("2104.06175").await.unwrap().unwrap();
        assert!(row.state.is_published());
        assert!(row.published_at.is_some());
        assert!(ledger.unpublished_with_resolved_identifier().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn existing_keys_include_placeholders() {
        let ledger = test_ledger().await;
        ledger
            .upsert_hits(&[hit("a", Some("Q1")), hit("b", None)])
            .await
            .unwrap();

        let keys = ledger.existing_keys().await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("a"));
        assert!(keys.contains("b"));
    }

    #[tokio::test]
    async fn work_queue_excludes_unmatched_and_published() {
        let ledger = test_ledger().await;
        ledger
            .upsert_hits(&[hit("a", Some("Q1")), hit("b", None), hit("c", Some("Q3"))])
            .await
            .unwrap();
        ledger.mark_published("c").await.unwrap();

        let queue = ledger.unpublished_with_resolved_identifier().await.unwrap();
        let ids: Vec<&str> = queue.iter().map(|r| r.arxiv_id()).collect();
        assert_eq!(ids, vec!["a"]);
        assert_eq!(queue[0].hit.repo_url.as_deref(), Some("https://github.com/x/a"));
        assert!(queue[0].hit.mentioned_in_paper);

        let stats = ledger.stats().await.unwrap();
        assert_eq!(
            stats,
            LedgerStats {
                total: 3,
                resolved: 2,
                published: 1,
                pending: 1,
            }
        );
    }

    #[tokio::test]
    async fn mark_published_flips_once() {
        let ledger = test_ledger().await;
        ledger.upsert_hits(&[hit("a", Some("Q1"))]).await.unwrap();

        assert!(ledger.mark_published("a").await.unwrap());
        assert!(!ledger.mark_published("a").await.unwrap());
        assert!(!ledger.mark_published("missing").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_mark_published() {
        let ledger = Arc::new(test_ledger().await);
        let hits: Vec<SearchHit> = (0..20)
            .map(|i| hit(&format!("2101.{i:05}"), Some(&format!("Q{i}"))))
            .collect();
        ledger.upsert_hits(&hits).await.unwrap();

        let mut handles = Vec::new();
        for h in &hits {
            let ledger = Arc::clone(&ledger);
            let id = h.arxiv_id.clone();
            handles.push(tokio::spawn(
                async move { ledger.mark_published(&id).await },
            ));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap());
        }

        let stats = ledger.stats().await.unwrap();
        assert_eq!(stats.published, 20);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn empty_ledger_stats() {
        let ledger = test_ledger().await;
        assert_eq!(ledger.stats().await.unwrap(), LedgerStats::default());
        assert_eq!(ledger.upsert_hits(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = temp_path();
        {
            let ledger = Ledger::open(&tmp).await.unwrap();
            ledger.upsert_hits(&[hit("a", Some("Q1"))]).await.unwrap();
        }

        let ro = Ledger::open_readonly(&tmp).await.expect("open readonly");
        assert_eq!(ro.stats().await.unwrap().total, 1);
        assert!(ro.mark_published("a").await.is_err());
    }

    #[tokio::test]
    async fn readonly_requires_existing_file() {
        let err = Ledger::open_readonly(&temp_path()).await.err().expect("missing file");
        assert!(matches!(err, PaperLinkError::InputNotFound { .. }));
    }
}
