//! paperlink CLI: link code repositories to publications in the knowledge graph.
//!
//! Streams the paper/repository links dump, resolves each arXiv id against the
//! graph's search index, records results in a local ledger, and publishes
//! confirmed links back to the graph.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
