//! Shared types, error model, and configuration for paperlink.
//!
//! This crate is the foundation depended on by all other paperlink crates.
//! It provides:
//! - [`PaperLinkError`], the unified error type
//! - Domain types ([`PaperRecord`], [`SearchHit`], [`LedgerRow`], [`Provenance`])
//! - Configuration ([`AppConfig`], [`SearchConfig`], [`GraphConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, Credentials, DefaultsConfig, GraphConfig, GraphProperties, GraphSection,
    IngestSettings, PublishConfig, PublishSettings, SearchConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from, validate_credentials,
};
pub use error::{PaperLinkError, Result};
pub use types::{LedgerRow, LedgerStats, PaperRecord, Provenance, PublishState, SearchHit};
