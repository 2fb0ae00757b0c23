//! Resumable traversal of the dump.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use paperlink_shared::{PaperLinkError, PaperRecord, Result};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::array::JsonArrayReader;

/// Read buffer for the dump file.
const READ_BUFFER_BYTES: usize = 256 * 1024;

/// Counters for one pass over the dump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorStats {
    /// Records handed to the caller, repeated keys included.
    pub yielded: u64,
    /// Records whose key was already in the ledger.
    pub skipped_existing: u64,
    /// Yielded records whose key appeared earlier in this pass.
    pub duplicates: u64,
    /// Records without a usable arXiv id.
    pub missing_key: u64,
}

impl CursorStats {
    /// Every record read, yielded or not.
    pub fn total_read(&self) -> u64 {
        self.yielded + self.skipped_existing + self.missing_key
    }
}

/// Lazy sequence of `(arxiv_id, record)` pairs not yet present in the ledger.
///
/// The set of existing keys is taken once at open time. Resumption is
/// "skip anything already ingested", not a byte offset. A key repeated within
/// the dump is yielded every time so the last entry's values end up stored.
pub struct DumpCursor {
    records: JsonArrayReader<BufReader<File>, PaperRecord>,
    existing: HashSet<String>,
    seen: HashSet<String>,
    stats: CursorStats,
}

impl DumpCursor {
    /// Open the dump at `path`. Fails with `InputNotFound` if it does not exist.
    pub fn open(path: &Path, existing: HashSet<String>) -> Result<Self> {
        let file = open_dump(path)?;
        tracing::debug!(?path, existing = existing.len(), "opened dump");

        Ok(Self {
            records: JsonArrayReader::new(BufReader::with_capacity(READ_BUFFER_BYTES, file), path),
            existing,
            seen: HashSet::new(),
            stats: CursorStats::default(),
        })
    }

    pub fn stats(&self) -> CursorStats {
        self.stats
    }
}

impl Iterator for DumpCursor {
    type Item = Result<(String, PaperRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.records.next()? {
                Ok(record) => record,
                Err(e) => return Some(Err(e)),
            };

            let Some(key) = record.arxiv_id().map(str::to_string) else {
                self.stats.missing_key += 1;
                continue;
            };
            if self.existing.contains(&key) {
                self.stats.skipped_existing += 1;
                continue;
            }
            if !self.seen.insert(key.clone()) {
                self.stats.duplicates += 1;
                tracing::debug!(arxiv_id = %key, "key repeated in dump, later entry supersedes");
            }

            self.stats.yielded += 1;
            return Some(Ok((key, record)));
        }
    }
}

/// Only the key, so the counting pass does not materialize whole records.
#[derive(Deserialize)]
struct KeyOnly {
    #[serde(default)]
    paper_arxiv_id: Option<String>,
}

/// Count the records a [`DumpCursor`] over the same inputs would yield.
pub fn count_pending(path: &Path, existing: &HashSet<String>) -> Result<u64> {
    let file = open_dump(path)?;
    let reader = JsonArrayReader::<_, KeyOnly>::new(
        BufReader::with_capacity(READ_BUFFER_BYTES, file),
        path,
    );

    let mut pending = 0u64;
    for entry in reader {
        let entry = entry?;
        let Some(key) = entry
            .paper_arxiv_id
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
        else {
            continue;
        };
        if !existing.contains(key) {
            pending += 1;
        }
    }
    Ok(pending)
}

/// Drive `cursor` on a blocking thread, feeding a bounded channel.
///
/// The reader blocks once `capacity` records are waiting, so memory stays
/// bounded regardless of dump size. Dropping the receiver stops the reader.
/// The handle resolves to the cursor's final counters.
pub fn spawn_cursor(
    mut cursor: DumpCursor,
    capacity: usize,
) -> (
    mpsc::Receiver<Result<(String, PaperRecord)>>,
    JoinHandle<CursorStats>,
) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::task::spawn_blocking(move || {
        for item in cursor.by_ref() {
            let failed = item.is_err();
            if tx.blocking_send(item).is_err() || failed {
                break;
            }
        }
        cursor.stats()
    });
    (rx, handle)
}

fn open_dump(path: &Path) -> Result<File> {
    if !path.exists() {
        return Err(PaperLinkError::InputNotFound {
            path: PathBuf::from(path),
        });
    }
    File::open(path).map_err(|e| PaperLinkError::io(path, e))
}
