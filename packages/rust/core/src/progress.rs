//! Progress reporting hooks and ETA estimation.

use std::time::Duration;

use crate::ingest::IngestSummary;
use crate::publish::PublishSummary;

/// Telemetry for one persisted ingestion batch.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// 1-based batch number.
    pub index: u64,
    /// Records in this batch.
    pub records: usize,
    /// Rows written (one per record).
    pub hits: usize,
    /// Rows in this batch with a resolved identifier.
    pub resolved: usize,
    pub batch_elapsed: Duration,
    /// Time since ingestion started.
    pub elapsed: Duration,
    /// Records processed so far, this batch included.
    pub processed: u64,
    /// Records expected in this pass, when known.
    pub total: Option<u64>,
    pub remaining: Option<Duration>,
}

/// Extrapolate time left: `(elapsed / processed) * total - elapsed`.
pub fn estimate_remaining(elapsed: Duration, processed: u64, total: Option<u64>) -> Option<Duration> {
    let total = total?;
    if processed == 0 {
        return None;
    }
    let projected = elapsed.mul_f64(total as f64 / processed as f64);
    Some(projected.saturating_sub(elapsed))
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once the number of records to ingest is known.
    fn ingest_started(&self, total: Option<u64>);
    /// Called after each batch is persisted.
    fn batch_done(&self, report: &BatchReport);
    /// Called when ingestion completes.
    fn ingest_done(&self, summary: &IngestSummary);
    /// Called before the first graph write.
    fn publish_started(&self, total: usize);
    /// Called after each row is published or fails.
    fn row_finished(&self, arxiv_id: &str, current: usize, total: usize);
    /// Called when publishing completes.
    fn publish_done(&self, summary: &PublishSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn ingest_started(&self, _total: Option<u64>) {}
    fn batch_done(&self, _report: &BatchReport) {}
    fn ingest_done(&self, _summary: &IngestSummary) {}
    fn publish_started(&self, _total: usize) {}
    fn row_finished(&self, _arxiv_id: &str, _current: usize, _total: usize) {}
    fn publish_done(&self, _summary: &PublishSummary) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eta_extrapolates_linearly() {
        let eta = estimate_remaining(Duration::from_secs(10), 100, Some(400)).unwrap();
        assert_eq!(eta.as_secs(), 30);
    }

    #[test]
    fn eta_unknown_without_total_or_progress() {
        assert!(estimate_remaining(Duration::from_secs(10), 100, None).is_none());
        assert!(estimate_remaining(Duration::from_secs(10), 0, Some(10)).is_none());
    }

    #[test]
    fn eta_never_negative() {
        let eta = estimate_remaining(Duration::from_secs(10), 50, Some(40)).unwrap();
        assert_eq!(eta, Duration::ZERO);
    }
}
