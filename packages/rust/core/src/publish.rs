//! Publisher: ledger → remote graph.
//!
//! Loads every resolved, unpublished row and writes its link statement through
//! a [`GraphWriter`] on a bounded worker pool. A row is flagged published only
//! after its write is confirmed. A failed write is logged and the row stays
//! queued for the next run, unless `fail_fast` is set. Ledger failures are
//! always fatal.
//!
//! Writes to the same target entity run one at a time, since each write reads
//! the entity's current claims before replacing them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use paperlink_graph::{GraphWriter, LinkStatement};
use paperlink_shared::{PaperLinkError, PublishSettings, Result};
use paperlink_storage::Ledger;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::context::RunContext;
use crate::progress::ProgressReporter;

/// Outcome of one publish pass.
#[derive(Debug, Clone)]
pub struct PublishSummary {
    pub run_id: uuid::Uuid,
    /// Rows a write was attempted for.
    pub attempted: usize,
    pub published: usize,
    /// Rows whose write failed (still unpublished).
    pub failed: usize,
    /// Rows left out for missing data (still unpublished).
    pub skipped: usize,
    /// `(arxiv_id, reason)` per failed write.
    pub failures: Vec<(String, String)>,
    pub elapsed: Duration,
}

enum RowOutcome {
    Published,
    WriteFailed(PaperLinkError),
    LedgerFailed(PaperLinkError),
}

/// Publish every pending row.
#[instrument(skip_all, fields(run_id = %ctx.run_id(), workers = settings.workers))]
pub async fn run_publish(
    settings: &PublishSettings,
    ledger: Arc<Ledger>,
    writer: Arc<dyn GraphWriter>,
    ctx: &RunContext,
    progress: &dyn ProgressReporter,
) -> Result<PublishSummary> {
    settings.validate()?;
    let start = Instant::now();

    progress.phase("Loading unpublished rows");
    let rows = ledger.unpublished_with_resolved_identifier().await?;

    let mut statements = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for row in &rows {
        match LinkStatement::for_hit(&row.hit, &settings.properties) {
            Ok(statement) => statements.push(statement),
            Err(e) => {
                warn!(arxiv_id = %row.arxiv_id(), error = %e, "skipping row");
                ctx.record_publish_skipped();
                skipped += 1;
            }
        }
    }

    let total = statements.len();
    info!(pending = rows.len(), attempting = total, skipped, "starting publish");
    progress.phase("Publishing to knowledge graph");
    progress.publish_started(total);

    let mut target_locks: HashMap<String, Arc<Mutex<()>>> = HashMap::new();
    let semaphore = Arc::new(Semaphore::new(settings.workers));
    let mut tasks = JoinSet::new();
    for statement in statements {
        let ledger = Arc::clone(&ledger);
        let writer = Arc::clone(&writer);
        let sem = Arc::clone(&semaphore);
        let target_lock = Arc::clone(target_locks.entry(statement.target.clone()).or_default());
        tasks.spawn(async move {
            let _target = target_lock.lock().await;
            let outcome = match sem.acquire_owned().await {
                Ok(_permit) => publish_row(&statement, ledger.as_ref(), writer.as_ref()).await,
                Err(e) => RowOutcome::LedgerFailed(PaperLinkError::Network(format!(
                    "worker pool closed: {e}"
                ))),
            };
            (statement.arxiv_id, outcome)
        });
    }

    let mut published = 0;
    let mut failures = Vec::new();
    let mut finished = 0;
    while let Some(joined) = tasks.join_next().await {
        let (arxiv_id, outcome) = match joined {
            Ok(result) => result,
            Err(e) => {
                tasks.abort_all();
                return Err(PaperLinkError::Network(format!("publish task failed: {e}")));
            }
        };
        finished += 1;

        match outcome {
            RowOutcome::Published => {
                ctx.record_published();
                published += 1;
            }
            RowOutcome::WriteFailed(e) if settings.fail_fast => {
                tasks.abort_all();
                return Err(e);
            }
            RowOutcome::WriteFailed(e) => {
                warn!(%arxiv_id, error = %e, "publication failed, row stays unpublished");
                ctx.record_publish_failure();
                failures.push((arxiv_id.clone(), e.to_string()));
            }
            RowOutcome::LedgerFailed(e) => {
                tasks.abort_all();
                return Err(e);
            }
        }
        progress.row_finished(&arxiv_id, finished, total);
    }

    let summary = PublishSummary {
        run_id: ctx.run_id(),
        attempted: total,
        published,
        failed: failures.len(),
        skipped,
        failures,
        elapsed: start.elapsed(),
    };
    info!(
        attempted = summary.attempted,
        published = summary.published,
        failed = summary.failed,
        skipped = summary.skipped,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "publish complete"
    );
    progress.publish_done(&summary);
    Ok(summary)
}

async fn publish_row(
    statement: &LinkStatement,
    ledger: &Ledger,
    writer: &dyn GraphWriter,
) -> RowOutcome {
    if let Err(e) = writer.write_statement(statement).await {
        return RowOutcome::WriteFailed(e);
    }
    match ledger.mark_published(&statement.arxiv_id).await {
        Ok(true) => RowOutcome::Published,
        Ok(false) => {
            debug!(arxiv_id = %statement.arxiv_id, "row was already flagged");
            RowOutcome::Published
        }
        Err(e) => RowOutcome::LedgerFailed(e),
    }
}
