//! Per-run context passed explicitly into ingest and publish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Identity and counters for one invocation.
///
/// Shared by reference between the dispatcher and its workers; counters are
/// atomics so no lock is needed to bump them.
#[derive(Debug)]
pub struct RunContext {
    run_id: Uuid,
    started: Instant,
    counters: RunCounters,
}

#[derive(Debug, Default)]
struct RunCounters {
    records_processed: AtomicU64,
    hits_persisted: AtomicU64,
    batches: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
    publish_skipped: AtomicU64,
}

/// Point-in-time copy of the run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub records_processed: u64,
    pub hits_persisted: u64,
    pub batches: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub publish_skipped: u64,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::now_v7(),
            started: Instant::now(),
            counters: RunCounters::default(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Time since the context was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn record_batch(&self, records: u64, hits: u64) -> u64 {
        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        self.counters.hits_persisted.fetch_add(hits, Ordering::Relaxed);
        self.counters
            .records_processed
            .fetch_add(records, Ordering::Relaxed)
            + records
    }

    pub(crate) fn record_published(&self) {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_publish_failure(&self) {
        self.counters.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_publish_skipped(&self) {
        self.counters.publish_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let c = &self.counters;
        CounterSnapshot {
            records_processed: c.records_processed.load(Ordering::Relaxed),
            hits_persisted: c.hits_persisted.load(Ordering::Relaxed),
            batches: c.batches.load(Ordering::Relaxed),
            published: c.published.load(Ordering::Relaxed),
            publish_failures: c.publish_failures.load(Ordering::Relaxed),
            publish_skipped: c.publish_skipped.load(Ordering::Relaxed),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
