//! Batch dispatcher: dump → search → ledger.
//!
//! Records are pulled off the dump in fixed-size batches. Every record in a
//! batch is looked up concurrently (bounded by `workers`); the batch is only
//! persisted once every lookup has returned, and a single failure aborts the
//! run. Batches already persisted stay persisted, so a re-run resumes from the
//! ledger's existing keys.
//!
//! A key repeated in the dump is looked up again and its later entry overwrites
//! the earlier row. Within one batch the later entry replaces the queued one,
//! so a batch never holds two copies of a key.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use paperlink_dump::{CursorStats, DumpCursor, count_pending, spawn_cursor};
use paperlink_search::SearchClient;
use paperlink_shared::{IngestSettings, PaperLinkError, PaperRecord, Result, SearchHit};
use paperlink_storage::Ledger;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument};

use crate::context::RunContext;
use crate::progress::{BatchReport, ProgressReporter, estimate_remaining};

/// Outcome of one ingestion pass.
#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub run_id: uuid::Uuid,
    pub batches: u64,
    /// Records looked up.
    pub records: u64,
    /// Rows written, placeholders included.
    pub hits_persisted: u64,
    /// Rows written with a resolved identifier.
    pub resolved: u64,
    /// Dump traversal counters (skipped, duplicates, missing keys).
    pub cursor: CursorStats,
    pub elapsed: Duration,
}

/// Run one ingestion pass over `settings.dump_path`.
#[instrument(skip_all, fields(run_id = %ctx.run_id(), dump = %settings.dump_path.display()))]
pub async fn run_ingest(
    settings: &IngestSettings,
    client: &SearchClient,
    ledger: &Ledger,
    ctx: &RunContext,
    progress: &dyn ProgressReporter,
) -> Result<IngestSummary> {
    settings.validate()?;
    let start = Instant::now();

    if !settings.dump_path.exists() {
        return Err(PaperLinkError::InputNotFound {
            path: settings.dump_path.clone(),
        });
    }

    progress.phase("Loading ledger keys");
    let existing = ledger.existing_keys().await?;
    info!(existing = existing.len(), "ledger keys loaded");

    let (existing, total) = if settings.estimate_total {
        progress.phase("Counting pending records");
        let path = settings.dump_path.clone();
        let (existing, counted) =
            tokio::task::spawn_blocking(move || {
                let counted = count_pending(&path, &existing);
                (existing, counted)
            })
            .await
            .map_err(|e| PaperLinkError::Io {
                path: settings.dump_path.clone(),
                source: std::io::Error::other(e),
            })?;
        (existing, Some(counted?))
    } else {
        (existing, None)
    };
    info!(pending = ?total, "starting ingestion");
    progress.ingest_started(total);

    let cursor = DumpCursor::open(&settings.dump_path, existing)?;
    let (mut records, reader) = spawn_cursor(cursor, settings.batch_size.saturating_mul(2));

    progress.phase("Querying search index");
    let semaphore = Arc::new(Semaphore::new(settings.workers));
    let mut batches = 0u64;
    let mut records_seen = 0u64;
    let mut hits_persisted = 0u64;
    let mut resolved = 0u64;

    loop {
        let (batch, record_count) = next_batch(&mut records, settings.batch_size).await?;
        if record_count == 0 {
            break;
        }

        batches += 1;
        let batch_start = Instant::now();

        let hits = search_batch(client, &semaphore, batch).await?;
        ledger.upsert_hits(&hits).await?;

        let batch_resolved = hits.iter().filter(|h| h.is_resolved()).count();
        records_seen += record_count as u64;
        hits_persisted += hits.len() as u64;
        resolved += batch_resolved as u64;
        let processed = ctx.record_batch(record_count as u64, hits.len() as u64);

        let elapsed = start.elapsed();
        let report = BatchReport {
            index: batches,
            records: record_count,
            hits: hits.len(),
            resolved: batch_resolved,
            batch_elapsed: batch_start.elapsed(),
            elapsed,
            processed: records_seen,
            total,
            remaining: estimate_remaining(elapsed, records_seen, total),
        };
        info!(
            batch = report.index,
            records = report.records,
            resolved = report.resolved,
            processed,
            batch_ms = report.batch_elapsed.as_millis() as u64,
            elapsed_secs = elapsed.as_secs(),
            eta_secs = report.remaining.map(|d| d.as_secs()),
            "batch persisted"
        );
        progress.batch_done(&report);
    }

    let cursor = reader
        .await
        .map_err(|e| PaperLinkError::Io {
            path: settings.dump_path.clone(),
            source: std::io::Error::other(e),
        })?;

    let summary = IngestSummary {
        run_id: ctx.run_id(),
        batches,
        records: records_seen,
        hits_persisted,
        resolved,
        cursor,
        elapsed: start.elapsed(),
    };
    info!(
        batches,
        records = records_seen,
        resolved,
        skipped_existing = cursor.skipped_existing,
        duplicates = cursor.duplicates,
        missing_key = cursor.missing_key,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "ingestion complete"
    );
    progress.ingest_done(&summary);
    Ok(summary)
}

/// Pull up to `batch_size` records off the channel.
///
/// Returns the batch and the number of records consumed. A key already queued
/// in this batch has its record replaced by the later one in place.
async fn next_batch(
    records: &mut mpsc::Receiver<Result<(String, PaperRecord)>>,
    batch_size: usize,
) -> Result<(Vec<(String, PaperRecord)>, usize)> {
    let mut batch: Vec<(String, PaperRecord)> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut consumed = 0;

    while consumed < batch_size {
        let Some(item) = records.recv().await else {
            break;
        };
        let (key, record) = item?;
        consumed += 1;
        match slots.get(&key) {
            Some(&slot) => {
                debug!(arxiv_id = %key, "later dump entry replaces queued one");
                batch[slot].1 = record;
            }
            None => {
                slots.insert(key.clone(), batch.len());
                batch.push((key, record));
            }
        }
    }
    Ok((batch, consumed))
}

/// Look up every record of one batch concurrently; first failure wins.
async fn search_batch(
    client: &SearchClient,
    semaphore: &Arc<Semaphore>,
    batch: Vec<(String, PaperRecord)>,
) -> Result<Vec<SearchHit>> {
    let mut tasks = JoinSet::new();
    for (key, record) in batch {
        let client = client.clone();
        let sem = Arc::clone(semaphore);
        tasks.spawn(async move {
            let _permit = sem
                .acquire_owned()
                .await
                .map_err(|e| PaperLinkError::Network(format!("worker pool closed: {e}")))?;
            let hits = client.search(&key, &record).await?;
            Ok::<_, PaperLinkError>((key, hits))
        });
    }

    let mut merged: BTreeMap<String, SearchHit> = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => Err(PaperLinkError::Network(format!("search task failed: {e}"))),
        };
        match outcome {
            Ok((key, hits)) => {
                if let Some(hit) = collapse_hits(hits) {
                    merged.insert(key, hit);
                }
            }
            Err(e) => {
                tasks.abort_all();
                return Err(e);
            }
        }
    }

    debug!(rows = merged.len(), "batch searched");
    Ok(merged.into_values().collect())
}

/// One row per key: the first hit with an identifier, else the first hit.
fn collapse_hits(hits: Vec<SearchHit>) -> Option<SearchHit> {
    let resolved = hits.iter().position(SearchHit::is_resolved).unwrap_or(0);
    hits.into_iter().nth(resolved)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::progress::SilentProgress;
    use crate::test_support::{search_client, search_server, temp_ledger, write_dump};
    use paperlink_shared::PublishState;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, ResponseTemplate};

    fn settings(dump: &std::path::Path, batch_size: usize) -> IngestSettings {
        IngestSettings {
            dump_path: dump.to_path_buf(),
            batch_size,
            workers: 3,
            estimate_total: true,
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        batches: Mutex<Vec<BatchReport>>,
        total: Mutex<Option<u64>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, _name: &str) {}
        fn ingest_started(&self, total: Option<u64>) {
            *self.total.lock().unwrap() = total;
        }
        fn batch_done(&self, report: &BatchReport) {
            self.batches.lock().unwrap().push(report.clone());
        }
        fn ingest_done(&self, _summary: &IngestSummary) {}
        fn publish_started(&self, _total: usize) {}
        fn row_finished(&self, _arxiv_id: &str, _current: usize, _total: usize) {}
        fn publish_done(&self, _summary: &crate::publish::PublishSummary) {}
    }

    #[test]
    fn collapse_prefers_resolved_hit() {
        let record = PaperRecord::default();
        let unmatched = SearchHit::matched("a", &record, None, "t1".into(), "s1".into());
        let matched = SearchHit::matched("a", &record, Some("Q1".into()), "t2".into(), "s2".into());
        let other = SearchHit::matched("a", &record, Some("Q2".into()), "t3".into(), "s3".into());

        let hit = collapse_hits(vec![unmatched.clone(), matched, other]).unwrap();
        assert_eq!(hit.qid.as_deref(), Some("Q1"));

        let hit = collapse_hits(vec![unmatched]).unwrap();
        assert_eq!(hit.title.as_deref(), Some("t1"));
        assert!(collapse_hits(Vec::new()).is_none());
    }

    #[tokio::test]
    async fn resolves_and_persists_example_record() {
        let server = search_server().await;
        let dump = write_dump(&[("2104.06175", true, false)]);
        let ledger = temp_ledger().await;
        let ctx = RunContext::new();

        let summary = run_ingest(
            &settings(&dump, 10),
            &search_client(&server),
            &ledger,
            &ctx,
            &SilentProgress,
        )
        .await
        .expect("ingest");

        assert_eq!(summary.records, 1);
        assert_eq!(summary.resolved, 1);
        let row = ledger.get("2104.06175").await.unwrap().expect("row");
        assert_eq!(row.hit.qid.as_deref(), Some("Q12345"));
        assert_eq!(row.state, PublishState::Unpublished);
        assert_eq!(row.hit.repo_url.as_deref(), Some("https://github.com/x/2104.06175"));
    }

    #[tokio::test]
    async fn unmatched_keys_get_placeholders() {
        let server = search_server().await;
        let dump = write_dump(&[("2104.06175", true, false), ("1111.11111", false, true)]);
        let ledger = temp_ledger().await;

        run_ingest(
            &settings(&dump, 10),
            &search_client(&server),
            &ledger,
            &RunContext::new(),
            &SilentProgress,
        )
        .await
        .expect("ingest");

        let stats = ledger.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.resolved, 1);
        let placeholder = ledger.get("1111.11111").await.unwrap().unwrap();
        assert!(placeholder.hit.qid.is_none());
        assert!(placeholder.hit.title.is_none());
    }

    #[tokio::test]
    async fn reports_each_batch_with_eta() {
        let server = search_server().await;
        let ids: Vec<String> = (0..7).map(|i| format!("2001.{i:05}")).collect();
        let entries: Vec<(&str, bool, bool)> = ids.iter().map(|id| (id.as_str(), true, false)).collect();
        let dump = write_dump(&entries);
        let ledger = temp_ledger().await;
        let progress = RecordingProgress::default();

        let summary = run_ingest(
            &settings(&dump, 3),
            &search_client(&server),
            &ledger,
            &RunContext::new(),
            &progress,
        )
        .await
        .expect("ingest");

        assert_eq!(summary.batches, 3);
        assert_eq!(*progress.total.lock().unwrap(), Some(7));
        let batches = progress.batches.lock().unwrap();
        let sizes: Vec<usize> = batches.iter().map(|b| b.records).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(batches.last().unwrap().processed, 7);
        assert!(batches.iter().all(|b| b.remaining.is_some()));
    }

    #[tokio::test]
    async fn second_run_skips_ingested_keys() {
        let server = search_server().await;
        let dump = write_dump(&[
            ("2104.06175", true, false),
            ("1111.11111", false, false),
            ("2222.22222", false, true),
        ]);
        let ledger = temp_ledger().await;
        let client = search_client(&server);

        let first = run_ingest(&settings(&dump, 2), &client, &ledger, &RunContext::new(), &SilentProgress)
            .await
            .expect("first run");
        assert_eq!(first.records, 3);

        let second = run_ingest(&settings(&dump, 2), &client, &ledger, &RunContext::new(), &SilentProgress)
            .await
            .expect("second run");
        assert_eq!(second.records, 0);
        assert_eq!(second.batches, 0);
        assert_eq!(second.cursor.skipped_existing, 3);
        assert_eq!(ledger.stats().await.unwrap().total, 3);
    }

    #[tokio::test]
    async fn failure_aborts_run_and_keeps_completed_batches() {
        let server = wiremock::MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("srsearch=arXiv0003.00003MaRDI"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "query": { "search": [] }
            })))
            .mount(&server)
            .await;

        let dump = write_dump(&[
            ("0001.00001", false, false),
            ("0002.00002", false, false),
            ("0003.00003", false, false),
            ("0004.00004", false, false),
            ("0005.00005", false, false),
        ]);
        let ledger = temp_ledger().await;

        let err = run_ingest(
            &settings(&dump, 2),
            &search_client(&server),
            &ledger,
            &RunContext::new(),
            &SilentProgress,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            PaperLinkError::EnrichmentUnavailable { ref arxiv_id, .. } if arxiv_id == "0003.00003"
        ));
        let keys = ledger.existing_keys().await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("0001.00001"));
        assert!(keys.contains("0002.00002"));
    }

    fn dump_with_repos(entries: &[(&str, &str)]) -> std::path::PathBuf {
        let records: Vec<serde_json::Value> = entries
            .iter()
            .map(|(id, repo)| {
                serde_json::json!({
                    "paper_url": format!("https://paperswithcode.com/paper/{id}"),
                    "paper_arxiv_id": id,
                    "repo_url": repo,
                    "is_official": false,
                    "mentioned_in_paper": true,
                    "mentioned_in_github": false,
                })
            })
            .collect();
        let path = std::env::temp_dir().join(format!("pl_core_dump_{}.json", uuid::Uuid::now_v7()));
        std::fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();
        path
    }

    #[tokio::test]
    async fn repeated_key_across_batches_keeps_last_entry() {
        let server = search_server().await;
        let dump = dump_with_repos(&[
            ("2104.06175", "https://github.com/first/repo"),
            ("2104.06175", "https://github.com/second/repo"),
        ]);
        let ledger = temp_ledger().await;

        let summary = run_ingest(
            &settings(&dump, 1),
            &search_client(&server),
            &ledger,
            &RunContext::new(),
            &SilentProgress,
        )
        .await
        .expect("ingest");

        assert_eq!(summary.records, 2);
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.cursor.duplicates, 1);
        let row = ledger.get("2104.06175").await.unwrap().expect("row");
        assert_eq!(row.hit.repo_url.as_deref(), Some("https://github.com/second/repo"));
        assert_eq!(ledger.stats().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn repeated_key_within_batch_is_searched_once() {
        let server = wiremock::MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("srsearch=arXiv2104.06175MaRDI"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "query": { "search": [] }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "query": { "search": [] }
            })))
            .mount(&server)
            .await;

        let dump = dump_with_repos(&[
            ("2104.06175", "https://github.com/first/repo"),
            ("1111.11111", "https://github.com/other/repo"),
            ("2104.06175", "https://github.com/second/repo"),
        ]);
        let ledger = temp_ledger().await;
        let progress = RecordingProgress::default();

        let summary = run_ingest(
            &settings(&dump, 10),
            &search_client(&server),
            &ledger,
            &RunContext::new(),
            &progress,
        )
        .await
        .expect("ingest");

        assert_eq!(summary.records, 3);
        assert_eq!(summary.hits_persisted, 2);
        assert_eq!(progress.batches.lock().unwrap()[0].processed, 3);
        assert_eq!(*progress.total.lock().unwrap(), Some(3));
        let row = ledger.get("2104.06175").await.unwrap().expect("row");
        assert_eq!(row.hit.repo_url.as_deref(), Some("https://github.com/second/repo"));
    }

    #[tokio::test]
    async fn lookups_never_exceed_worker_count() {
        let delay = Duration::from_millis(150);
        let server = wiremock::MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "query": { "search": [] } }))
                    .set_delay(delay),
            )
            .expect(6)
            .mount(&server)
            .await;

        let ids: Vec<String> = (1..=6).map(|i| format!("3000.{i:05}")).collect();
        let entries: Vec<(&str, bool, bool)> = ids.iter().map(|id| (id.as_str(), false, false)).collect();
        let dump = write_dump(&entries);
        let ledger = temp_ledger().await;
        let mut s = settings(&dump, 6);
        s.workers = 2;

        let progress = RecordingProgress::default();
        run_ingest(&s, &search_client(&server), &ledger, &RunContext::new(), &progress)
            .await
            .expect("ingest");

        // Six delayed lookups through two workers take at least three rounds.
        let batches = progress.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert!(
            batches[0].batch_elapsed >= delay * 3,
            "batch finished in {:?}",
            batches[0].batch_elapsed
        );
    }

    #[tokio::test]
    async fn missing_dump_fails_before_any_work() {
        let ledger = temp_ledger().await;
        let server = search_server().await;
        let path = std::env::temp_dir().join("pl_missing_dump.json");

        let err = run_ingest(
            &settings(&path, 10),
            &search_client(&server),
            &ledger,
            &RunContext::new(),
            &SilentProgress,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PaperLinkError::InputNotFound { .. }));
        assert_eq!(ledger.stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn zero_workers_rejected() {
        let ledger = temp_ledger().await;
        let server = search_server().await;
        let dump = write_dump(&[("2104.06175", true, false)]);
        let mut s = settings(&dump, 10);
        s.workers = 0;

        let err = run_ingest(&s, &search_client(&server), &ledger, &RunContext::new(), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, PaperLinkError::Validation { .. }));
    }
}
