//! domainscout CLI: discover canonical domains across parsed documents.
//!
//! Imports parsed content blocks, runs candidate extraction, embedding
//! similarity and clustering, and lets a human curate borderline merges.

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
