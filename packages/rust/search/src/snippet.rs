//! Snippet cleanup and identifier extraction.

use std::sync::LazyLock;

use regex::Regex;

/// `QID` immediately followed by the entity id.
static QID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"QID(Q\d+)").expect("valid regex"));

const MATCH_OPEN: &str = r#"<span class="searchmatch">"#;
const MATCH_CLOSE: &str = "</span>";

/// Strip the search engine's inline highlighting markup.
pub fn clean_snippet(raw: &str) -> String {
    raw.replace(MATCH_OPEN, "").replace(MATCH_CLOSE, "")
}

/// First entity id in a cleaned snippet, if any.
pub fn extract_qid(snippet: &str) -> Option<String> {
    QID_RE
        .captures(snippet)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
