//! Search client for resolving arXiv ids to knowledge-graph entities.
//!
//! Each lookup is one `list=search` query against the MediaWiki Action API,
//! scoped to the publication namespace. The composite search string
//! `arXiv<id>MaRDI` matches the marker the graph stores on publication pages;
//! the entity id is then read out of the result snippet (`QID<id>`).
//!
//! Transient failures (transport errors, HTTP 429/5xx, undecodable bodies)
//! are retried with a fixed delay. Everything else fails immediately.

mod snippet;

use std::time::Duration;

use paperlink_shared::{PaperLinkError, PaperRecord, Result, SearchConfig, SearchHit};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;

pub use snippet::{clean_snippet, extract_qid};

/// User-Agent string for search requests.
const USER_AGENT: &str = concat!("paperlink/", env!("CARGO_PKG_VERSION"));

/// Title recorded when a result entry has none.
const NO_TITLE: &str = "(no title)";

/// MediaWiki error codes worth another attempt.
const RETRYABLE_API_CODES: &[&str] = &["ratelimited", "maxlag", "readonly", "internal_api_error"];

// ---------------------------------------------------------------------------
// Wire types (only the fields consumed)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    query: Option<QueryBlock>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryBlock {
    #[serde(default)]
    search: Vec<SearchEntry>,
}

#[derive(Debug, Deserialize)]
struct SearchEntry {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    snippet: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    info: String,
}

/// One failed attempt.
#[derive(Debug)]
struct AttemptError {
    reason: String,
    retryable: bool,
}

impl AttemptError {
    fn transient(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: true,
        }
    }

    fn permanent(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: false,
        }
    }
}

// ---------------------------------------------------------------------------
// SearchClient
// ---------------------------------------------------------------------------

/// Client for the remote search index. Cheap to clone; holds no per-call state.
#[derive(Debug, Clone)]
pub struct SearchClient {
    client: Client,
    endpoint: Url,
    config: SearchConfig,
}

impl SearchClient {
    pub fn new(config: SearchConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            PaperLinkError::config(format!("invalid search endpoint {:?}: {e}", config.endpoint))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PaperLinkError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            config,
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Composite search string for one arXiv id.
    pub fn search_string(arxiv_id: &str) -> String {
        format!("arXiv{arxiv_id}MaRDI")
    }

    fn form(&self, arxiv_id: &str) -> Vec<(&'static str, String)> {
        vec![
            ("action", "query".into()),
            ("list", "search".into()),
            ("srsearch", Self::search_string(arxiv_id)),
            ("srnamespace", self.config.namespace.clone()),
            ("format", "json".into()),
        ]
    }

    /// Equivalent `curl` invocation, for reproducing a failed lookup by hand.
    pub fn render_curl(&self, arxiv_id: &str) -> String {
        let mut cmd = format!("curl -X POST '{}'", self.endpoint);
        for (key, value) in self.form(arxiv_id) {
            cmd.push_str(&format!(" --data-urlencode '{key}={value}'"));
        }
        cmd
    }

    /// Look up one arXiv id.
    ///
    /// Always returns at least one hit: when the search comes back empty, a
    /// single placeholder with no identifier and no title is returned so the
    /// key is recorded as "queried, no match".
    #[instrument(skip_all, fields(arxiv_id = %arxiv_id))]
    pub async fn search(&self, arxiv_id: &str, record: &PaperRecord) -> Result<Vec<SearchHit>> {
        let max_attempts = self.config.max_retries + 1;
        let delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut attempt = 0;

        let entries = loop {
            attempt += 1;
            match self.attempt(arxiv_id).await {
                Ok(entries) => {
                    if attempt > 1 {
                        debug!(attempt, "search succeeded after retry");
                    }
                    break entries;
                }
                Err(err) if err.retryable && attempt < max_attempts => {
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = self.config.retry_delay_ms,
                        error = %err.reason,
                        "search failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(PaperLinkError::EnrichmentUnavailable {
                        arxiv_id: arxiv_id.to_string(),
                        attempts: attempt,
                        reason: err.reason,
                        request: self.render_curl(arxiv_id),
                    });
                }
            }
        };

        let hits = to_hits(arxiv_id, record, entries);
        debug!(
            hits = hits.len(),
            resolved = hits.iter().filter(|h| h.is_resolved()).count(),
            "search complete"
        );
        Ok(hits)
    }

    async fn attempt(&self, arxiv_id: &str) -> std::result::Result<Vec<SearchEntry>, AttemptError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .form(&self.form(arxiv_id))
            .send()
            .await
            .map_err(|e| AttemptError::transient(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let reason = format!("HTTP {status}");
            return Err(if is_retryable_status(status) {
                AttemptError::transient(reason)
            } else {
                AttemptError::permanent(reason)
            });
        }

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::transient(format!("undecodable response: {e}")))?;

        if let Some(err) = body.error {
            let reason = format!("API error {}: {}", err.code, err.info);
            return Err(if RETRYABLE_API_CODES.contains(&err.code.as_str()) {
                AttemptError::transient(reason)
            } else {
                AttemptError::permanent(reason)
            });
        }

        Ok(body.query.unwrap_or_default().search)
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn to_hits(arxiv_id: &str, record: &PaperRecord, entries: Vec<SearchEntry>) -> Vec<SearchHit> {
    if entries.is_empty() {
        return vec![SearchHit::unmatched(arxiv_id, record)];
    }

    entries
        .into_iter()
        .map(|entry| {
            let snippet = clean_snippet(&entry.snippet);
            let qid = extract_qid(&snippet);
            let title = entry.title.unwrap_or_else(|| NO_TITLE.to_string());
            SearchHit::matched(arxiv_id, record, qid, title, snippet)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("../../../fixtures/search/{name}"))
            .expect("read search fixture")
    }

    fn record() -> PaperRecord {
        PaperRecord {
            paper_arxiv_id: Some("2104.06175".into()),
            paper_url: Some("https://paperswithcode.com/paper/foo".into()),
            paper_title: Some("Foo".into()),
            repo_url: Some("https://github.com/x/y".into()),
            is_official: true,
            mentioned_in_paper: true,
            mentioned_in_github: false,
        }
    }

    fn client_for(server: &MockServer, max_retries: u32) -> SearchClient {
        SearchClient::new(SearchConfig {
            endpoint: format!("{}/w/api.php", server.uri()),
            max_retries,
            retry_delay_ms: 10,
            ..SearchConfig::default()
        })
        .expect("build client")
    }

    #[tokio::test]
    async fn resolves_identifier_from_snippet() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/w/api.php"))
            .and(body_string_contains("srsearch=arXiv2104.06175MaRDI"))
            .and(body_string_contains("srnamespace=4206"))
            .and(body_string_contains("list=search"))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixture("match.json")))
            .expect(1)
            .mount(&server)
            .await;

        let hits = client_for(&server, 0)
            .search("2104.06175", &record())
            .await
            .expect("search");

        assert_eq!(hits.len(), 1);
        let hit = &hits[0];
        assert_eq!(hit.qid.as_deref(), Some("Q12345"));
        assert_eq!(hit.title.as_deref(), Some("Publication:6362543"));
        assert!(!hit.snippet.contains("searchmatch"));
        assert_eq!(hit.repo_url.as_deref(), Some("https://github.com/x/y"));
        assert!(hit.mentioned_in_paper);
    }

    #[tokio::test]
    async fn empty_result_yields_placeholder() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixture("empty.json")))
            .mount(&server)
            .await;

        let hits = client_for(&server, 0)
            .search("2104.06175", &record())
            .await
            .expect("search");

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].qid, None);
        assert_eq!(hits[0].title, None);
        assert_eq!(hits[0].snippet, "");
        assert_eq!(
            hits[0].reference_url.as_deref(),
            Some("https://paperswithcode.com/paper/foo")
        );
    }

    #[tokio::test]
    async fn every_entry_becomes_a_hit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixture("multiple.json")))
            .mount(&server)
            .await;

        let hits = client_for(&server, 0)
            .search("1901.00001", &record())
            .await
            .expect("search");

        let qids: Vec<Option<&str>> = hits.iter().map(|h| h.qid.as_deref()).collect();
        assert_eq!(qids, vec![None, Some("Q777"), Some("Q888")]);
        assert_eq!(hits[1].title.as_deref(), Some("(no title)"));
        assert!(hits.iter().all(|h| h.arxiv_id == "1901.00001"));
    }

    #[tokio::test]
    async fn retries_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixture("match.json")))
            .mount(&server)
            .await;

        let hits = client_for(&server, 2)
            .search("2104.06175", &record())
            .await
            .expect("search after retry");
        assert_eq!(hits[0].qid.as_deref(), Some("Q12345"));
    }

    #[tokio::test]
    async fn exhausted_retries_surface_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let err = client_for(&server, 2)
            .search("2104.06175", &record())
            .await
            .unwrap_err();

        match err {
            PaperLinkError::EnrichmentUnavailable {
                arxiv_id,
                attempts,
                reason,
                request,
            } => {
                assert_eq!(arxiv_id, "2104.06175");
                assert_eq!(attempts, 3);
                assert!(reason.contains("502"));
                assert!(request.starts_with("curl -X POST"));
                assert!(request.contains("srsearch=arXiv2104.06175MaRDI"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server, 3)
            .search("2104.06175", &record())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PaperLinkError::EnrichmentUnavailable { attempts: 1, .. }
        ));
    }

    #[tokio::test]
    async fn garbage_body_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .expect(2)
            .mount(&server)
            .await;

        let err = client_for(&server, 1)
            .search("2104.06175", &record())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PaperLinkError::EnrichmentUnavailable { attempts: 2, .. }
        ));
    }

    #[tokio::test]
    async fn api_error_object_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"error": {"code": "badvalue", "info": "Unrecognized value for parameter \"list\""}}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server, 3)
            .search("2104.06175", &record())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("badvalue"));
    }

    #[test]
    fn invalid_endpoint_rejected() {
        let config = SearchConfig {
            endpoint: "not a url".into(),
            ..SearchConfig::default()
        };
        assert!(matches!(
            SearchClient::new(config),
            Err(PaperLinkError::Config { .. })
        ));
    }

    #[test]
    fn curl_rendering() {
        let client = SearchClient::new(SearchConfig::default()).expect("client");
        let cmd = client.render_curl("2104.06175");
        assert!(cmd.contains("'https://portal.mardi4nfdi.de/w/api.php'"));
        assert!(cmd.contains("--data-urlencode 'srnamespace=4206'"));
        assert!(cmd.contains("--data-urlencode 'format=json'"));
    }
}
