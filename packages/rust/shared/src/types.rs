//! Core domain types for paperlink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// PaperRecord
// ---------------------------------------------------------------------------

/// One entry of the paper/repository links dump. Read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperRecord {
    /// arXiv identifier (natural key). Missing on some dump entries.
    #[serde(default)]
    pub paper_arxiv_id: Option<String>,
    /// Reference page describing the paper/repository link.
    #[serde(default)]
    pub paper_url: Option<String>,
    #[serde(default)]
    pub paper_title: Option<String>,
    /// URL of the code repository.
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_official: bool,
    /// The repository link was found in the paper itself.
    #[serde(default, deserialize_with = "null_as_false")]
    pub mentioned_in_paper: bool,
    /// The paper was referenced from the repository README.
    #[serde(default, deserialize_with = "null_as_false")]
    pub mentioned_in_github: bool,
}

impl PaperRecord {
    /// The natural key, if present and non-empty.
    pub fn arxiv_id(&self) -> Option<&str> {
        self.paper_arxiv_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

fn null_as_false<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Where a repository link was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Publication,
    RepositoryReadme,
    Unknown,
}

impl Provenance {
    /// Derive the provenance from the two dump flags. The paper wins over the README.
    pub fn from_flags(mentioned_in_paper: bool, mentioned_in_github: bool) -> Self {
        if mentioned_in_paper {
            Self::Publication
        } else if mentioned_in_github {
            Self::RepositoryReadme
        } else {
            Self::Unknown
        }
    }

    /// Human-readable label written to the graph.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Publication => "publication",
            Self::RepositoryReadme => "repository README",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// SearchHit
// ---------------------------------------------------------------------------

/// Enrichment result for one [`PaperRecord`].
///
/// `qid == None` is the "queried, no match" placeholder; it is still persisted
/// so that re-runs do not query the key again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub arxiv_id: String,
    /// Resolved knowledge-graph identifier (e.g. `Q12345`).
    pub qid: Option<String>,
    pub title: Option<String>,
    pub repo_url: Option<String>,
    pub is_official: bool,
    pub mentioned_in_paper: bool,
    pub mentioned_in_github: bool,
    /// Reference page URL (`paper_url` in the dump).
    pub reference_url: Option<String>,
    /// Cleaned search snippet, kept for diagnostics.
    pub snippet: String,
}

impl SearchHit {
    /// A hit built from one search result entry.
    pub fn matched(
        arxiv_id: &str,
        record: &PaperRecord,
        qid: Option<String>,
        title: String,
        snippet: String,
    ) -> Self {
        Self {
            qid,
            title: Some(title),
            snippet,
            ..Self::unmatched(arxiv_id, record)
        }
    }

    /// The placeholder stored when the search returned nothing.
    pub fn unmatched(arxiv_id: &str, record: &PaperRecord) -> Self {
        Self {
            arxiv_id: arxiv_id.to_string(),
            qid: None,
            title: None,
            repo_url: record.repo_url.clone(),
            is_official: record.is_official,
            mentioned_in_paper: record.mentioned_in_paper,
            mentioned_in_github: record.mentioned_in_github,
            reference_url: record.paper_url.clone(),
            snippet: String::new(),
        }
    }

    /// Whether a graph identifier was resolved.
    pub fn is_resolved(&self) -> bool {
        self.qid.is_some()
    }

    pub fn provenance(&self) -> Provenance {
        Provenance::from_flags(self.mentioned_in_paper, self.mentioned_in_github)
    }
}

// ---------------------------------------------------------------------------
// LedgerRow
// ---------------------------------------------------------------------------

/// Publication state of a ledger row. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishState {
    Unpublished,
    Published,
}

impl PublishState {
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published)
    }
}

/// A persisted [`SearchHit`] plus its publication bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRow {
    pub hit: SearchHit,
    pub state: PublishState,
    pub ingested_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl LedgerRow {
    pub fn arxiv_id(&self) -> &str {
        &self.hit.arxiv_id
    }
}

/// Aggregate counts over the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    /// All rows (matched and placeholders).
    pub total: u64,
    /// Rows with a resolved identifier.
    pub resolved: u64,
    pub published: u64,
    /// Resolved but not yet published.
    pub pending: u64,
}
