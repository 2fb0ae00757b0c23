//! Writing repository links to the remote knowledge graph.
//!
//! The publisher talks to the graph only through [`GraphWriter`], so the
//! Wikibase client can be swapped for an in-memory recorder in tests.

mod statement;
mod wikibase;

use async_trait::async_trait;
use paperlink_shared::Result;

pub use statement::{LinkStatement, Reference};
pub use wikibase::WikibaseWriter;

/// Sink for link statements.
///
/// A write replaces every existing value of the statement's property on the
/// target entity. Implementations report failures as
/// [`PaperLinkError::PublicationFailure`](paperlink_shared::PaperLinkError).
#[async_trait]
pub trait GraphWriter: Send + Sync {
    async fn write_statement(&self, statement: &LinkStatement) -> Result<()>;
}
