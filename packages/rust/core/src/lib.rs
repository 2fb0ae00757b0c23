//! Core pipeline orchestration for paperlink.
//!
//! This crate ties the dump cursor, search client, ledger and graph writer
//! together into the two phases of a run: [`ingest::run_ingest`] and
//! [`publish::run_publish`].

pub mod context;
pub mod ingest;
pub mod progress;
pub mod publish;

pub use context::{CounterSnapshot, RunContext};
pub use ingest::{IngestSummary, run_ingest};
pub use progress::{BatchReport, ProgressReporter, SilentProgress, estimate_remaining};
pub use publish::{PublishSummary, run_publish};
