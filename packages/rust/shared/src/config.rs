//! Application configuration for paperlink.
//!
//! User config lives at `~/.paperlink/paperlink.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PaperLinkError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "paperlink.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".paperlink";

/// Largest accepted batch size.
pub const MAX_BATCH_SIZE: usize = 100_000;

/// Largest accepted worker pool, for either phase.
pub const MAX_WORKERS: usize = 1_024;

/// Default MediaWiki Action API of the knowledge graph portal.
const DEFAULT_API_URL: &str = "https://portal.mardi4nfdi.de/w/api.php";

// ---------------------------------------------------------------------------
// Config structs (matching paperlink.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Search endpoint settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Remote graph settings.
    #[serde(default)]
    pub graph: GraphSection,

    /// Publisher settings.
    #[serde(default)]
    pub publish: PublishConfig,
}

impl AppConfig {
    /// Ledger file location (`data_dir/db_file`).
    pub fn db_path(&self) -> PathBuf {
        Path::new(&self.defaults.data_dir).join(&self.defaults.db_file)
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory holding the ledger file.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Ledger file name inside `data_dir`.
    #[serde(default = "default_db_file")]
    pub db_file: String,

    /// Dump records per ingestion batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent search requests per batch.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_file: default_db_file(),
            batch_size: default_batch_size(),
            workers: default_workers(),
        }
    }
}

fn default_data_dir() -> String {
    "./data".into()
}
fn default_db_file() -> String {
    "results.db".into()
}
fn default_batch_size() -> usize {
    10
}
fn default_workers() -> usize {
    3
}

/// `[search]` section. Also used directly as the runtime search config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// MediaWiki Action API endpoint queried with `list=search`.
    #[serde(default = "default_api_url")]
    pub endpoint: String,

    /// Namespace the search is scoped to.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Retries after the first failed attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between attempts.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_api_url(),
            namespace: default_namespace(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.into()
}
fn default_namespace() -> String {
    "4206".into()
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    2000
}
fn default_timeout() -> u64 {
    30
}

/// `[graph]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSection {
    /// MediaWiki Action API endpoint of the Wikibase instance.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Name of the env var holding the bot user name (never store the value itself).
    #[serde(default = "default_user_env")]
    pub user_env: String,

    /// Name of the env var holding the bot password.
    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// "has companion code repository".
    #[serde(default = "default_repository_property")]
    pub repository_property: String,

    /// Reference: page the link was taken from.
    #[serde(default = "default_reference_url_property")]
    pub reference_url_property: String,

    /// Reference: where the link was extracted from.
    #[serde(default = "default_provenance_property")]
    pub provenance_property: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for GraphSection {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            user_env: default_user_env(),
            password_env: default_password_env(),
            repository_property: default_repository_property(),
            reference_url_property: default_reference_url_property(),
            provenance_property: default_provenance_property(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_user_env() -> String {
    "PAPERLINK_KG_USER".into()
}
fn default_password_env() -> String {
    "PAPERLINK_KG_PASSWORD".into()
}
fn default_repository_property() -> String {
    "P1687".into()
}
fn default_reference_url_property() -> String {
    "P1688".into()
}
fn default_provenance_property() -> String {
    "P1689".into()
}

/// `[publish]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Concurrent graph writes.
    #[serde(default = "default_publish_workers")]
    pub workers: usize,

    /// Abort the whole job on the first failed write instead of logging and continuing.
    #[serde(default)]
    pub fail_fast: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            workers: default_publish_workers(),
            fail_fast: false,
        }
    }
}

fn default_publish_workers() -> usize {
    10
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Property ids used for the link statement and its reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphProperties {
    pub repository: String,
    pub reference_url: String,
    pub provenance: String,
}

/// Runtime graph configuration.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub api_url: String,
    pub properties: GraphProperties,
    pub timeout_secs: u64,
}

impl From<&AppConfig> for GraphConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            api_url: config.graph.api_url.clone(),
            properties: GraphProperties::from(config),
            timeout_secs: config.graph.timeout_secs,
        }
    }
}

impl From<&AppConfig> for GraphProperties {
    fn from(config: &AppConfig) -> Self {
        Self {
            repository: config.graph.repository_property.clone(),
            reference_url: config.graph.reference_url_property.clone(),
            provenance: config.graph.provenance_property.clone(),
        }
    }
}

/// Runtime ingestion settings.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Path to the JSON array dump.
    pub dump_path: PathBuf,
    pub batch_size: usize,
    pub workers: usize,
    /// Run a key-only pre-pass over the dump to know the total for ETA reporting.
    pub estimate_total: bool,
}

impl IngestSettings {
    /// Settings for `dump_path` with batch size and workers from config.
    pub fn from_config(config: &AppConfig, dump_path: impl Into<PathBuf>) -> Self {
        Self {
            dump_path: dump_path.into(),
            batch_size: config.defaults.batch_size,
            workers: config.defaults.workers,
            estimate_total: true,
        }
    }

    /// Reject empty or oversized batches and pools.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(PaperLinkError::validation(format!(
                "batch size must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        validate_workers(self.workers)
    }
}

fn validate_workers(workers: usize) -> Result<()> {
    if !(1..=MAX_WORKERS).contains(&workers) {
        return Err(PaperLinkError::validation(format!(
            "worker count must be between 1 and {MAX_WORKERS}, got {workers}"
        )));
    }
    Ok(())
}

/// Runtime publish settings.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub workers: usize,
    pub fail_fast: bool,
    pub properties: GraphProperties,
}

impl From<&AppConfig> for PublishSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            workers: config.publish.workers,
            fail_fast: config.publish.fail_fast,
            properties: GraphProperties::from(config),
        }
    }
}

impl PublishSettings {
    pub fn validate(&self) -> Result<()> {
        validate_workers(self.workers)
    }
}

/// Bot credentials for the remote graph.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.paperlink/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PaperLinkError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.paperlink/paperlink.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PaperLinkError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        PaperLinkError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PaperLinkError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PaperLinkError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PaperLinkError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the graph bot credentials from the env vars named in the config.
pub fn validate_credentials(config: &AppConfig) -> Result<Credentials> {
    let read = |var_name: &str| match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Some(val),
        _ => None,
    };

    match (read(&config.graph.user_env), read(&config.graph.password_env)) {
        (Some(user), Some(password)) => Ok(Credentials { user, password }),
        _ => Err(PaperLinkError::config(format!(
            "knowledge graph credentials not found. Set the {} and {} environment variables.",
            config.graph.user_env, config.graph.password_env
        ))),
    }
}
