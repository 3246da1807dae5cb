//! coursegraph CLI: collect, transform and render course block structures.
//!
//! Loads a course export, runs the block structure transformers over it and
//! prints the student-facing result.

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
