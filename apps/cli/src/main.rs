//! modeldoc CLI: business documentation for BI semantic models.
//!
//! Reads measure/table/column/relationship exports, analyses them, and
//! writes a stakeholder-readable report with its metadata record.

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
