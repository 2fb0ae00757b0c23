//! [`GraphWriter`] backed by the Wikibase Action API.
//!
//! Session setup: bot-password login (`action=login` with a login token), then
//! a CSRF token for edits. Each write reads the existing claims on the
//! property and the entity's last revision with `wbgetentities`, then replaces
//! the claims in one `wbeditentity` call pinned to that revision. An edit
//! conflict means the entity changed in between: the claims are re-read and
//! the edit retried. An expired CSRF token is refreshed once per edit.

use std::time::Duration;

use async_trait::async_trait;
use paperlink_shared::{Credentials, GraphConfig, PaperLinkError, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::{GraphWriter, LinkStatement};

/// User-Agent string for graph requests.
const USER_AGENT: &str = concat!("paperlink/", env!("CARGO_PKG_VERSION"));

const EDIT_SUMMARY: &str = "Link publication to its code repository";

/// Re-reads allowed after an `editconflict` before the write fails.
const MAX_EDIT_CONFLICTS: u32 = 3;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    query: Option<TokenQuery>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    #[serde(default)]
    tokens: Tokens,
}

#[derive(Debug, Default, Deserialize)]
struct Tokens {
    #[serde(default)]
    logintoken: Option<String>,
    #[serde(default)]
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    login: Option<LoginResult>,
}

#[derive(Debug, Deserialize)]
struct LoginResult {
    result: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    info: String,
}

#[derive(Debug, Deserialize)]
struct EditResponse {
    #[serde(default)]
    success: Option<i64>,
    #[serde(default)]
    error: Option<ApiError>,
}

/// Claims on one property plus the revision they were read at.
#[derive(Debug)]
struct CurrentClaims {
    claim_ids: Vec<String>,
    base_revision: Option<u64>,
}

// ---------------------------------------------------------------------------
// WikibaseWriter
// ---------------------------------------------------------------------------

/// Logged-in Wikibase session.
pub struct WikibaseWriter {
    client: Client,
    api_url: Url,
    csrf_token: RwLock<String>,
}

impl WikibaseWriter {
    /// Log in and fetch an edit token.
    #[instrument(skip_all, fields(api_url = %config.api_url, user = %credentials.user))]
    pub async fn connect(config: &GraphConfig, credentials: &Credentials) -> Result<Self> {
        let api_url = Url::parse(&config.api_url).map_err(|e| {
            PaperLinkError::config(format!("invalid graph API URL {:?}: {e}", config.api_url))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PaperLinkError::Network(format!("failed to build HTTP client: {e}")))?;

        let writer = Self {
            client,
            api_url,
            csrf_token: RwLock::new(String::new()),
        };
        writer.login(credentials).await?;
        writer.refresh_token().await?;
        info!("logged in to knowledge graph");
        Ok(writer)
    }

    async fn fetch_token(&self, kind: &str) -> Result<String> {
        let response: TokenResponse = self
            .client
            .get(self.api_url.clone())
            .query(&[
                ("action", "query"),
                ("meta", "tokens"),
                ("type", kind),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(|e| PaperLinkError::Network(format!("{kind} token request failed: {e}")))?
            .error_for_status()
            .map_err(|e| PaperLinkError::Network(format!("{kind} token request failed: {e}")))?
            .json()
            .await
            .map_err(|e| PaperLinkError::parse(format!("{kind} token response: {e}")))?;

        let tokens = response.query.unwrap_or_default().tokens;
        let token = match kind {
            "login" => tokens.logintoken,
            _ => tokens.csrftoken,
        };
        token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PaperLinkError::parse(format!("no {kind} token in response")))
    }

    async fn login(&self, credentials: &Credentials) -> Result<()> {
        let login_token = self.fetch_token("login").await?;

        let response: LoginResponse = self
            .client
            .post(self.api_url.clone())
            .form(&[
                ("action", "login"),
                ("lgname", credentials.user.as_str()),
                ("lgpassword", credentials.password.as_str()),
                ("lgtoken", login_token.as_str()),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(|e| PaperLinkError::Network(format!("login request failed: {e}")))?
            .json()
            .await
            .map_err(|e| PaperLinkError::parse(format!("login response: {e}")))?;

        match response.login {
            Some(result) if result.result == "Success" => Ok(()),
            Some(result) => Err(PaperLinkError::config(format!(
                "knowledge graph login failed: {}{}",
                result.result,
                result.reason.map(|r| format!(" ({r})")).unwrap_or_default()
            ))),
            None => Err(PaperLinkError::parse("login response has no result")),
        }
    }

    async fn refresh_token(&self) -> Result<()> {
        let token = self.fetch_token("csrf").await?;
        *self.csrf_token.write().await = token;
        debug!("refreshed edit token");
        Ok(())
    }

    /// Claims currently attached to `property` on `entity`, and the entity's
    /// last revision id.
    async fn current_claims(&self, entity: &str, property: &str) -> Result<CurrentClaims> {
        let body: Value = self
            .client
            .get(self.api_url.clone())
            .query(&[
                ("action", "wbgetentities"),
                ("ids", entity),
                ("props", "info|claims"),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(|e| PaperLinkError::Network(format!("wbgetentities failed: {e}")))?
            .error_for_status()
            .map_err(|e| PaperLinkError::Network(format!("wbgetentities failed: {e}")))?
            .json()
            .await
            .map_err(|e| PaperLinkError::parse(format!("wbgetentities response: {e}")))?;

        if let Some(err) = body.get("error") {
            return Err(PaperLinkError::Network(format!("wbgetentities error: {err}")));
        }

        let entity = &body["entities"][entity];
        let claim_ids = entity["claims"][property]
            .as_array()
            .map(|claims| {
                claims
                    .iter()
                    .filter_map(|c| c["id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(CurrentClaims {
            claim_ids,
            base_revision: entity["lastrevid"].as_u64(),
        })
    }

    async fn edit(
        &self,
        statement: &LinkStatement,
        data: &str,
        base_revision: Option<u64>,
    ) -> Result<EditResponse> {
        let token = self.csrf_token.read().await.clone();
        let base_revision = base_revision.map(|rev| rev.to_string());
        let mut form = vec![
            ("action", "wbeditentity"),
            ("id", statement.target.as_str()),
            ("data", data),
            ("summary", EDIT_SUMMARY),
            ("bot", "1"),
            ("token", token.as_str()),
            ("format", "json"),
        ];
        if let Some(rev) = base_revision.as_deref() {
            form.push(("baserevid", rev));
        }

        self.client
            .post(self.api_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| PaperLinkError::Network(format!("wbeditentity failed: {e}")))?
            .error_for_status()
            .map_err(|e| PaperLinkError::Network(format!("wbeditentity failed: {e}")))?
            .json()
            .await
            .map_err(|e| PaperLinkError::parse(format!("wbeditentity response: {e}")))
    }

    async fn write(&self, statement: &LinkStatement) -> Result<()> {
        let mut conflicts = 0;
        loop {
            let current = self
                .current_claims(&statement.target, &statement.property)
                .await?;
            let data = statement.edit_payload(&current.claim_ids).to_string();

            let mut response = self.edit(statement, &data, current.base_revision).await?;
            if response
                .error
                .as_ref()
                .is_some_and(|err| err.code == "badtoken")
            {
                warn!("edit token expired, refreshing");
                self.refresh_token().await?;
                response = self.edit(statement, &data, current.base_revision).await?;
            }

            match response.error {
                Some(err) if err.code == "editconflict" && conflicts < MAX_EDIT_CONFLICTS => {
                    conflicts += 1;
                    warn!(
                        base_revision = ?current.base_revision,
                        attempt = conflicts,
                        "entity changed since read, re-reading claims"
                    );
                    continue;
                }
                Some(err) => {
                    return Err(PaperLinkError::Network(format!(
                        "{}: {}",
                        err.code, err.info
                    )));
                }
                None => {}
            }
            if response.success != Some(1) {
                return Err(PaperLinkError::parse("wbeditentity did not report success"));
            }

            debug!(replaced = current.claim_ids.len(), "statement written");
            return Ok(());
        }
    }
}

#[async_trait]
impl GraphWriter for WikibaseWriter {
    #[instrument(skip_all, fields(arxiv_id = %statement.arxiv_id, qid = %statement.target))]
    async fn write_statement(&self, statement: &LinkStatement) -> Result<()> {
        self.write(statement).await.map_err(|e| {
            PaperLinkError::publication(&statement.arxiv_id, &statement.target, e.to_string())
        })
    }
}
