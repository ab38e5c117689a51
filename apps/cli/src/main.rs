//! Roadmend CLI: link integrity and repair for stored learning roadmaps.
//!
//! A bare `roadmend` runs one validation pass and exits 0, including when
//! another run already holds the lock.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    // A missing .env is fine.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = commands::resolve_config(&cli)?;
    commands::init_tracing(&cli, &config)?;
    commands::run(cli, config).await
}
