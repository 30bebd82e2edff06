//! edastream CLI: upload datasets and follow EDA pipeline runs live.
//!
//! Uploads a dataset to the EDA server, streams the generated analysis
//! blocks as they execute, and browses report history.

mod commands;
mod render;

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
